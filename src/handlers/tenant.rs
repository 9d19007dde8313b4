//! 租户管理

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;

use crate::{auth::middleware::AuthContext, error::AppError, middleware::AppState};

/// 轮换入站 API key，新 key 只在这次响应里出现
pub async fn rotate_api_key(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
) -> Result<impl IntoResponse, AppError> {
    let scope = auth_context.scope()?;
    state
        .permission_service
        .require_permission(&auth_context.actor, &scope, "tenant.update")
        .await?;

    let api_key = state.tenant_service.rotate_api_key(&scope).await?;

    tracing::info!(user_id = %auth_context.actor.id, "Inbound API key rotated by user");

    Ok(Json(json!({
        "tenant_id": scope.tenant_id(),
        "api_key": api_key
    })))
}
