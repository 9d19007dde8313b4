//! 外部身份提供方
//!
//! 登录时前端拿到的一次性 session_id 交给 [`IdentityProvider`] 换取已验证的身份。
//! 生产环境请求 `security.identity_url`，把 session_id 放在 `X-Session-ID` 头里。

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{AppError, Result};

pub const SESSION_ID_HEADER: &str = "X-Session-ID";

/// 身份提供方确认过的用户资料
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VerifiedIdentity {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub picture: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// session_id 无效或已被消费时返回认证错误
    async fn resolve(&self, session_id: &str) -> Result<VerifiedIdentity>;
}

pub struct HttpIdentityProvider {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl HttpIdentityProvider {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| AppError::Config(format!("security.identity_url: {}", e)))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tenant-core/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Config(format!("identity client: {}", e)))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn resolve(&self, session_id: &str) -> Result<VerifiedIdentity> {
        let response = self
            .client
            .get(self.url.clone())
            .header(SESSION_ID_HEADER, session_id)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Identity provider unreachable");
                AppError::internal_error("identity provider unreachable")
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(status = status.as_u16(), "Identity provider rejected session");
            return Err(AppError::authentication("invalid session id"));
        }

        let identity: VerifiedIdentity = response.json().await.map_err(|e| {
            tracing::warn!(error = %e, "Identity provider returned malformed profile");
            AppError::authentication("invalid identity response")
        })?;

        if identity.email.trim().is_empty() {
            return Err(AppError::authentication("identity has no email"));
        }
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_url_rejected() {
        let err = HttpIdentityProvider::new("/session-data", Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_profile_picture_optional() {
        let identity: VerifiedIdentity =
            serde_json::from_str(r#"{"email":"a@b.test","name":"A"}"#).unwrap();
        assert_eq!(identity.picture, None);
    }
}
