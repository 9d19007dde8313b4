//! 登录、当前用户与登出

use axum::{
    extract::{Query, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    auth::middleware::{expired_session_cookie, session_cookie, AuthContext},
    config::AuthenticatorKind,
    error::AppError,
    middleware::AppState,
    models::user::CurrentUserResponse,
};

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub email: String,
    pub name: String,
    pub picture: Option<String>,
    /// 本次登录是否开通了新租户
    pub provisioned: bool,
    pub token: String,
    /// session / bearer
    pub token_type: &'static str,
    pub expires_in: u64,
}

/// 用身份提供方的 session_id 换取本系统凭证；首次登录时开通租户
///
/// 会话模式下同时下发 `session_token` cookie，JWT 模式只在响应体里返回令牌。
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionQuery>,
) -> Result<Response, AppError> {
    let provider = state
        .identity
        .as_ref()
        .ok_or_else(|| AppError::BadRequest("external sign-in is not configured".to_string()))?;

    let session_id = query.session_id.trim();
    if session_id.is_empty() {
        return Err(AppError::validation("session_id: must not be empty"));
    }

    let identity = provider.resolve(session_id).await?;
    let (user, provisioned) = state.tenant_service.sign_in(&identity).await?;
    if !user.is_active {
        tracing::warn!(user_id = %user.id, "Inactive user attempted to sign in");
        return Err(AppError::authentication("user is inactive"));
    }

    let security = &state.config.security;
    let (token, token_type, expires_in, cookie) = match security.authenticator {
        AuthenticatorKind::Session => {
            let session = state.session_service.start(&user).await?;
            let cookie = session_cookie(&session.session_token, security.session_ttl_secs);
            (session.session_token, "session", security.session_ttl_secs, Some(cookie))
        }
        AuthenticatorKind::Jwt => {
            let jwt = state
                .jwt
                .as_ref()
                .ok_or_else(|| AppError::internal_error("jwt service missing in jwt mode"))?;
            let token = jwt.generate_access_token(&user)?;
            (token, "bearer", security.access_token_exp_secs, None)
        }
    };

    tracing::info!(user_id = %user.id, tenant_id = ?user.tenant_id, provisioned, "Signed in");

    let body = SessionResponse {
        id: user.id,
        tenant_id: user.tenant_id,
        email: user.email,
        name: user.name,
        picture: user.picture,
        provisioned,
        token,
        token_type,
        expires_in,
    };

    let mut response = Json(body).into_response();
    if let Some(cookie) = cookie {
        let value = HeaderValue::from_str(&cookie)
            .map_err(|_| AppError::internal_error("session token is not a valid header value"))?;
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    Ok(response)
}

/// 获取当前用户信息：角色、组和解析后的有效权限
pub async fn get_current_user(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
) -> Result<impl IntoResponse, AppError> {
    let scope = auth_context.scope()?;
    let actor = auth_context.actor;

    let (roles, groups) = state.permission_service.memberships(&actor, &scope).await?;
    let permissions = state.permission_service.resolve(&actor, &scope).await?;

    Ok(Json(CurrentUserResponse {
        id: actor.id,
        tenant_id: actor.tenant_id,
        email: actor.email,
        name: actor.name,
        picture: actor.picture,
        is_active: actor.is_active,
        tier: actor.tier,
        roles: roles.into_iter().map(|r| r.name).collect(),
        groups: groups.into_iter().map(|g| g.name).collect(),
        permissions: permissions.into_vec(),
    }))
}

/// 登出：删除该用户的所有会话并清除 cookie
pub async fn logout(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
) -> Result<impl IntoResponse, AppError> {
    let removed = state.session_service.logout(&auth_context.actor).await?;

    Ok((
        [(header::SET_COOKIE, expired_session_cookie())],
        Json(json!({
            "message": "Logged out",
            "sessions_removed": removed
        })),
    ))
}
