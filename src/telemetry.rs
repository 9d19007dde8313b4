//! 结构化日志初始化

use crate::config::{AppConfig, LoggingConfig};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

/// 依赖库的噪音级别，RUST_LOG 可以覆盖
const DEPENDENCY_DIRECTIVES: &[&str] = &["sqlx=warn", "hyper=warn", "reqwest=warn", "tower_http=info"];

/// 由配置拼出过滤表达式，例如 `info,sqlx=warn,...`
fn default_directives(logging: &LoggingConfig) -> String {
    std::iter::once(logging.level.to_lowercase().as_str())
        .chain(DEPENDENCY_DIRECTIVES.iter().copied())
        .collect::<Vec<_>>()
        .join(",")
}

/// 安装全局 subscriber，只能调用一次
pub fn init_telemetry(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.logging)));

    let output = if config.logging.format.eq_ignore_ascii_case("pretty") {
        tracing_subscriber::fmt::layer().pretty().boxed()
    } else {
        // 投递 worker 的 span 关闭时带上耗时
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_events(FmtSpan::CLOSE)
            .boxed()
    };

    tracing_subscriber::registry().with(filter).with(output).init();

    tracing::info!(
        service = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        authorization_mode = ?config.security.authorization_mode,
        authenticator = ?config.security.authenticator,
        "logging ready"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_quiet_dependencies() {
        let logging = LoggingConfig {
            level: "DEBUG".to_string(),
            format: "json".to_string(),
        };
        let directives = default_directives(&logging);

        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("sqlx=warn"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }
}
