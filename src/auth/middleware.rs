//! 认证中间件
//! 从 Authorization 头或 session_token cookie 取凭证，交给当前配置的 Authenticator

use crate::{
    auth::authenticator::Credential,
    error::{AppError, Result},
    middleware::AppState,
    models::user::User,
    tenant::TenantScope,
};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

pub const SESSION_COOKIE: &str = "session_token";

/// 登录后下发的会话 cookie
pub fn session_cookie(token: &str, max_age_secs: u64) -> String {
    format!(
        "{}={}; HttpOnly; Secure; SameSite=None; Max-Age={}; Path=/",
        SESSION_COOKIE, token, max_age_secs
    )
}

/// 登出时让浏览器立即丢弃 cookie
pub fn expired_session_cookie() -> String {
    session_cookie("", 0)
}

/// 已认证的操作者，由 [`auth_middleware`] 放入请求扩展
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub actor: User,
}

impl AuthContext {
    /// 当前请求的租户范围
    pub fn scope(&self) -> Result<TenantScope> {
        TenantScope::for_actor(&self.actor)
    }
}

// 未经过 auth_middleware 的路由提取时返回 401
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}

/// 提取凭证：Bearer 优先，其次 cookie
pub fn extract_credential(headers: &HeaderMap) -> Result<Credential> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    if let Some(token) = bearer {
        return Ok(Credential::Bearer(token.to_string()));
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| Credential::SessionCookie(value.to_string()))
        .ok_or(AppError::Unauthorized)
}

/// 无凭证或凭证无效时直接 401，不进入 handler
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> std::result::Result<Response, AppError> {
    let credential = extract_credential(req.headers())?;
    let actor = state.authenticator.authenticate(&credential).await?;

    tracing::debug!(user_id = %actor.id, tenant_id = ?actor.tenant_id, "actor authenticated");

    req.extensions_mut().insert(AuthContext { actor });

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer 9f2c1e7a".parse().unwrap());

        assert_eq!(
            extract_credential(&headers).unwrap(),
            Credential::Bearer("9f2c1e7a".to_string())
        );
    }

    #[test]
    fn test_extract_session_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert("cookie", "theme=dark; session_token=abc123".parse().unwrap());

        assert_eq!(
            extract_credential(&headers).unwrap(),
            Credential::SessionCookie("abc123".to_string())
        );
    }

    #[test]
    fn test_issued_cookie_is_extractable() {
        let issued = session_cookie("tok-1", 3600);
        assert!(issued.contains("HttpOnly"));
        assert!(issued.contains("Max-Age=3600"));

        // 浏览器只回传 name=value
        let pair = issued.split(';').next().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("cookie", pair.parse().unwrap());
        assert_eq!(
            extract_credential(&headers).unwrap(),
            Credential::SessionCookie("tok-1".to_string())
        );

        assert!(expired_session_cookie().starts_with("session_token=;"));
        assert!(expired_session_cookie().contains("Max-Age=0"));
    }

    #[test]
    fn test_extract_missing_or_malformed() {
        let headers = HeaderMap::new();
        assert!(extract_credential(&headers).is_err());

        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Basic dXNlcjpwdw==".parse().unwrap());
        assert!(extract_credential(&headers).is_err());

        let mut headers = HeaderMap::new();
        headers.insert("cookie", "session_token=".parse().unwrap());
        assert!(extract_credential(&headers).is_err());
    }
}
