//! PostgreSQL 连接池、迁移与就绪探测

use crate::config::DatabaseConfig;
use secrecy::ExposeSecret;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool,
};
use std::{str::FromStr, time::Duration};

/// 在 pg_stat_activity 中标识本服务的连接
const APPLICATION_NAME: &str = "tenant-core";

/// 就绪探测的查询上限，超过即视为不可用
const CHECK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

fn connect_options(config: &DatabaseConfig) -> Result<PgConnectOptions, DbError> {
    PgConnectOptions::from_str(config.url.expose_secret())
        .map(|options| options.application_name(APPLICATION_NAME))
        // URL 里带密码，错误信息只保留类别
        .map_err(|_| DbError::ConnectionFailed("malformed database url".to_string()))
}

fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
        .test_before_acquire(true)
}

/// 建立连接池，失败时不重试，交给进程管理器重启
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, DbError> {
    let options = connect_options(config)?;

    let pool = pool_options(config)
        .connect_with(options)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "database pool could not be created");
            DbError::ConnectionFailed(e.to_string())
        })?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        application_name = APPLICATION_NAME,
        "database pool ready"
    );

    Ok(pool)
}

/// 执行 migrations/ 下的全部迁移
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    let migrator = sqlx::migrate!("./migrations");
    let known = migrator.iter().count();

    migrator.run(pool).await.map_err(|e| {
        tracing::error!(error = %e, "schema migration failed");
        DbError::MigrationFailed(e.to_string())
    })?;

    tracing::info!(migrations = known, "schema up to date");
    Ok(())
}

pub async fn health_check(pool: &PgPool) -> HealthStatus {
    let ping = sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool);

    match tokio::time::timeout(CHECK_TIMEOUT, ping).await {
        Ok(Ok(_)) => HealthStatus::Healthy,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "database health check failed");
            HealthStatus::Unhealthy(e.to_string())
        }
        Err(_) => {
            tracing::warn!(timeout_ms = CHECK_TIMEOUT.as_millis() as u64, "database health check timed out");
            HealthStatus::Unhealthy("health check timed out".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    fn database_config(url: &str) -> DatabaseConfig {
        DatabaseConfig {
            url: Secret::new(url.to_string()),
            max_connections: 4,
            min_connections: 1,
            acquire_timeout_secs: 5,
            idle_timeout_secs: 60,
            max_lifetime_secs: 300,
        }
    }

    #[test]
    fn test_connect_options_from_url() {
        let options =
            connect_options(&database_config("postgresql://core:pw@db.internal:5433/tenants")).unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 5433);
        assert_eq!(options.get_database(), Some("tenants"));
    }

    #[test]
    fn test_malformed_url_does_not_leak_password() {
        let err = connect_options(&database_config("postgresql://core:hunter2@[bad")).unwrap_err();
        assert!(!err.to_string().contains("hunter2"));
    }

    #[test]
    fn test_health_status() {
        assert!(HealthStatus::Healthy.is_healthy());
        assert!(!HealthStatus::Unhealthy("down".to_string()).is_healthy());
    }
}
