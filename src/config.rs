//! 运行配置
//!
//! 内置默认值 + `TC_` 前缀环境变量覆盖，层级用 `__` 分隔，例如
//! `TC_WEBHOOK__MAX_ATTEMPTS=3`。`database.url` 与 `security.authorization_mode` 没有默认值。

use config::{Config, ConfigError, Environment, File, FileFormat};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;

const DEFAULTS: &str = r#"
[server]
addr = "0.0.0.0:3000"
graceful_shutdown_timeout_secs = 30

[database]
max_connections = 10
min_connections = 2
acquire_timeout_secs = 30
idle_timeout_secs = 600
max_lifetime_secs = 1800

[logging]
level = "info"
format = "json"

[security]
jwt_secret = "local-development-only-jwt-secret-0000"
access_token_exp_secs = 900
session_ttl_secs = 604800
authenticator = "session"

[webhook]
delivery_timeout_secs = 30
max_in_flight = 16
queue_capacity = 1024
max_attempts = 5
backoff_base_ms = 500
backoff_max_secs = 60
shutdown_grace_secs = 10
"#;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub addr: String,
    /// 收到退出信号后等待请求与投递收尾的秒数
    pub graceful_shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// trace / debug / info / warn / error
    pub level: String,
    /// json / pretty
    pub format: String,
}

/// 认证方式：会话令牌或 JWT，二者可互换
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticatorKind {
    Session,
    Jwt,
}

/// 授权模式：每个部署只能选择一种
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationMode {
    /// 用户上的静态等级映射到固定权限表
    StaticTier,
    /// 角色/组/权限图
    Graph,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub jwt_secret: Secret<String>,
    pub access_token_exp_secs: u64,
    pub session_ttl_secs: u64,
    pub authenticator: AuthenticatorKind,
    pub authorization_mode: AuthorizationMode,
    /// 外部身份提供方地址；未配置时 `POST /api/v1/auth/session` 不可用
    #[serde(default)]
    pub identity_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// 单次投递请求超时（秒）
    pub delivery_timeout_secs: u64,
    /// 同时进行中的投递上限
    pub max_in_flight: usize,
    /// 投递队列容量，满时直接拒绝
    pub queue_capacity: usize,
    /// 每个投递最多尝试次数（含首次）
    pub max_attempts: u32,
    /// 退避基准（毫秒）
    pub backoff_base_ms: u64,
    /// 单次退避上限（秒）
    pub backoff_max_secs: u64,
    /// 关闭时等待进行中投递的时间（秒）
    pub shutdown_grace_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            delivery_timeout_secs: 30,
            max_in_flight: 16,
            queue_capacity: 1024,
            max_attempts: 5,
            backoff_base_ms: 500,
            backoff_max_secs: 60,
            shutdown_grace_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    pub webhook: WebhookConfig,
}

/// 会话有效期上限：365 天
pub const MAX_SESSION_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// 访问令牌有效期上限：1 天
pub const MAX_ACCESS_TOKEN_EXP_SECS: u64 = 24 * 60 * 60;

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Message(msg.into())
}

impl ServerConfig {
    fn check(&self) -> Result<(), ConfigError> {
        let port = self
            .addr
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse::<u16>().ok())
            .ok_or_else(|| invalid(format!("server.addr has no usable port: {}", self.addr)))?;

        // 0 表示随机端口
        if port != 0 && port < 1024 {
            return Err(invalid("server.addr must use a port >= 1024"));
        }
        Ok(())
    }
}

impl DatabaseConfig {
    fn check(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 || self.max_connections < self.min_connections {
            return Err(invalid("database.max_connections must be >= min_connections and > 0"));
        }
        Ok(())
    }
}

impl LoggingConfig {
    fn check(&self) -> Result<(), ConfigError> {
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        const FORMATS: [&str; 2] = ["json", "pretty"];

        let level = self.level.to_lowercase();
        if !LEVELS.contains(&level.as_str()) {
            return Err(invalid(format!(
                "logging.level `{}` is not one of {}",
                self.level,
                LEVELS.join("/")
            )));
        }
        let format = self.format.to_lowercase();
        if !FORMATS.contains(&format.as_str()) {
            return Err(invalid(format!(
                "logging.format `{}` is not one of {}",
                self.format,
                FORMATS.join("/")
            )));
        }
        Ok(())
    }
}

impl SecurityConfig {
    fn check(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.expose_secret().len() < 32 {
            return Err(invalid("security.jwt_secret needs at least 32 bytes"));
        }
        if !(60..=MAX_SESSION_TTL_SECS).contains(&self.session_ttl_secs) {
            return Err(invalid(format!(
                "security.session_ttl_secs must be between 60 and {}",
                MAX_SESSION_TTL_SECS
            )));
        }
        if !(1..=MAX_ACCESS_TOKEN_EXP_SECS).contains(&self.access_token_exp_secs) {
            return Err(invalid(format!(
                "security.access_token_exp_secs must be between 1 and {}",
                MAX_ACCESS_TOKEN_EXP_SECS
            )));
        }
        if let Some(url) = &self.identity_url {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(invalid("security.identity_url must be an http(s) url"));
            }
        }
        Ok(())
    }
}

impl WebhookConfig {
    fn check(&self) -> Result<(), ConfigError> {
        if !(1..=120).contains(&self.delivery_timeout_secs) {
            return Err(invalid("webhook.delivery_timeout_secs must be between 1 and 120"));
        }
        if self.max_in_flight == 0 || self.queue_capacity == 0 {
            return Err(invalid("webhook.max_in_flight and webhook.queue_capacity must be >= 1"));
        }
        if !(1..=10).contains(&self.max_attempts) {
            return Err(invalid("webhook.max_attempts must be between 1 and 10"));
        }
        if self.backoff_base_ms == 0 {
            return Err(invalid("webhook.backoff_base_ms must be > 0"));
        }
        Ok(())
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(DEFAULTS, FileFormat::Toml))
            .add_source(
                Environment::with_prefix("TC")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.check()?;
        self.database.check()?;
        self.logging.check()?;
        self.security.check()?;
        self.webhook.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "TC_DATABASE__URL",
        "TC_SERVER__ADDR",
        "TC_LOGGING__LEVEL",
        "TC_SECURITY__AUTHORIZATION_MODE",
        "TC_SECURITY__AUTHENTICATOR",
        "TC_WEBHOOK__MAX_ATTEMPTS",
        "TC_SECURITY__SESSION_TTL_SECS",
        "TC_SECURITY__IDENTITY_URL",
    ];

    /// 设置一组变量后加载，结束时清理
    fn load_with(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        for var in VARS {
            std::env::remove_var(var);
        }
        for (key, value) in vars {
            std::env::set_var(key, value);
        }
        let result = AppConfig::from_env();
        for var in VARS {
            std::env::remove_var(var);
        }
        result
    }

    const DB: (&str, &str) = ("TC_DATABASE__URL", "postgresql://core:pw@localhost/tenants");

    #[test]
    #[serial]
    fn test_builtin_defaults() {
        let config = load_with(&[DB, ("TC_SECURITY__AUTHORIZATION_MODE", "graph")]).unwrap();

        assert_eq!(config.server.addr, "0.0.0.0:3000");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.security.authenticator, AuthenticatorKind::Session);
        assert_eq!(config.security.authorization_mode, AuthorizationMode::Graph);
        assert_eq!(config.webhook.max_attempts, WebhookConfig::default().max_attempts);
        assert_eq!(config.webhook.queue_capacity, 1024);
    }

    #[test]
    #[serial]
    fn test_authorization_mode_is_required() {
        assert!(load_with(&[DB]).is_err());
    }

    #[test]
    #[serial]
    fn test_static_tier_mode_and_jwt() {
        let config = load_with(&[
            DB,
            ("TC_SECURITY__AUTHORIZATION_MODE", "static_tier"),
            ("TC_SECURITY__AUTHENTICATOR", "jwt"),
        ])
        .unwrap();

        assert_eq!(config.security.authorization_mode, AuthorizationMode::StaticTier);
        assert_eq!(config.security.authenticator, AuthenticatorKind::Jwt);
    }

    #[test]
    #[serial]
    fn test_privileged_port_rejected() {
        let result = load_with(&[
            DB,
            ("TC_SECURITY__AUTHORIZATION_MODE", "graph"),
            ("TC_SERVER__ADDR", "0.0.0.0:80"),
        ]);
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_zero_attempts_rejected() {
        let result = load_with(&[
            DB,
            ("TC_SECURITY__AUTHORIZATION_MODE", "graph"),
            ("TC_WEBHOOK__MAX_ATTEMPTS", "0"),
        ]);
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_unknown_log_level_rejected() {
        let result = load_with(&[
            DB,
            ("TC_SECURITY__AUTHORIZATION_MODE", "graph"),
            ("TC_LOGGING__LEVEL", "verbose"),
        ]);
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_session_ttl_upper_bound() {
        let huge = load_with(&[
            DB,
            ("TC_SECURITY__AUTHORIZATION_MODE", "graph"),
            ("TC_SECURITY__SESSION_TTL_SECS", "99999999999"),
        ]);
        assert!(huge.is_err());

        let year = MAX_SESSION_TTL_SECS.to_string();
        let config = load_with(&[
            DB,
            ("TC_SECURITY__AUTHORIZATION_MODE", "graph"),
            ("TC_SECURITY__SESSION_TTL_SECS", year.as_str()),
        ])
        .unwrap();
        assert_eq!(config.security.session_ttl_secs, MAX_SESSION_TTL_SECS);
    }

    #[test]
    #[serial]
    fn test_identity_url_optional_but_checked() {
        let config = load_with(&[DB, ("TC_SECURITY__AUTHORIZATION_MODE", "graph")]).unwrap();
        assert_eq!(config.security.identity_url, None);

        let config = load_with(&[
            DB,
            ("TC_SECURITY__AUTHORIZATION_MODE", "graph"),
            ("TC_SECURITY__IDENTITY_URL", "https://id.example.test/session-data"),
        ])
        .unwrap();
        assert_eq!(
            config.security.identity_url.as_deref(),
            Some("https://id.example.test/session-data")
        );

        let result = load_with(&[
            DB,
            ("TC_SECURITY__AUTHORIZATION_MODE", "graph"),
            ("TC_SECURITY__IDENTITY_URL", "id.example.test"),
        ]);
        assert!(result.is_err());
    }
}
