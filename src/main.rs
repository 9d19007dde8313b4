//! tenant-core 服务进程

use anyhow::Context;
use std::{sync::Arc, time::Duration};
use tenant_core::{
    clock::SystemClock,
    config::AppConfig,
    db,
    delivery::ReqwestSender,
    handlers::health,
    middleware::AppState,
    repository::Repositories,
    routes, telemetry,
};
use tokio::{net::TcpListener, signal};

const USAGE: &str = "\
用法: tenant-core [--check-config | --version | --help]

  --check-config  只加载并校验配置，不连接数据库
  --version       打印版本
  --help          打印本说明

配置全部来自 TC_ 前缀的环境变量，示例见 .env.example。
TC_ENV=<name> 时额外读取 .env.<name>，否则读取 .env.local 与 .env。";

enum Command {
    Serve,
    CheckConfig,
    Version,
    Help,
}

fn parse_command() -> Result<Command, String> {
    let mut args = std::env::args().skip(1);
    let command = match args.next().as_deref() {
        None => Command::Serve,
        Some("--check-config") => Command::CheckConfig,
        Some("--version") => Command::Version,
        Some("--help") | Some("-h") => Command::Help,
        Some(other) => return Err(format!("未知参数: {}", other)),
    };
    match args.next() {
        Some(extra) => Err(format!("多余的参数: {}", extra)),
        None => Ok(command),
    }
}

fn load_dotenv() {
    match std::env::var("TC_ENV") {
        Ok(name) => {
            dotenv::from_filename(format!(".env.{}", name)).ok();
        }
        Err(_) => {
            dotenv::from_filename(".env.local").ok();
            dotenv::dotenv().ok();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let command = match parse_command() {
        Ok(command) => command,
        Err(msg) => {
            eprintln!("{}\n\n{}", msg, USAGE);
            std::process::exit(2);
        }
    };

    match command {
        Command::Version => println!("tenant-core {}", env!("CARGO_PKG_VERSION")),
        Command::Help => println!("tenant-core {}\n\n{}", env!("CARGO_PKG_VERSION"), USAGE),
        Command::CheckConfig => {
            load_dotenv();
            AppConfig::from_env().context("invalid configuration")?;
            println!("configuration ok");
        }
        Command::Serve => {
            load_dotenv();
            serve().await?;
        }
    }
    Ok(())
}

async fn serve() -> anyhow::Result<()> {
    health::set_start_time();

    let config = AppConfig::from_env().context("invalid configuration")?;
    telemetry::init_telemetry(&config);

    let pool = db::create_pool(&config.database).await?;
    db::run_migrations(&pool).await?;

    let sender = ReqwestSender::new(Duration::from_secs(config.webhook.delivery_timeout_secs))
        .context("webhook http client")?;
    let state = Arc::new(AppState::build(
        config.clone(),
        Repositories::postgres(pool.clone()),
        Some(pool),
        Arc::new(SystemClock),
        Arc::new(sender),
    )?);

    let listener = TcpListener::bind(&config.server.addr)
        .await
        .with_context(|| format!("bind {}", config.server.addr))?;
    tracing::info!(addr = %config.server.addr, "accepting connections");

    axum::serve(listener, routes::create_router(state.clone()))
        .with_graceful_shutdown(wait_for_signal())
        .await?;

    // HTTP 停止后再排空投递队列
    let grace = Duration::from_secs(config.server.graceful_shutdown_timeout_secs);
    if tokio::time::timeout(grace, state.dispatcher.shutdown()).await.is_err() {
        tracing::warn!(grace_secs = grace.as_secs(), "dispatcher did not drain in time");
    }

    tracing::info!("stopped");
    Ok(())
}

async fn wait_for_signal() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let received = tokio::select! {
        _ = interrupt => "SIGINT",
        _ = terminate => "SIGTERM",
    };
    tracing::info!(signal = received, "shutting down");
}
