//! 审计日志查询

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::{
    auth::middleware::AuthContext,
    error::AppError,
    middleware::AppState,
    models::audit::AuditLogQuery,
};

/// 查询当前租户的审计日志
pub async fn list_audit_logs(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Query(query): Query<AuditLogQuery>,
) -> Result<impl IntoResponse, AppError> {
    let scope = auth_context.scope()?;
    state
        .permission_service
        .require_permission(&auth_context.actor, &scope, "audit.read")
        .await?;

    let page = state.audit_service.query(&scope, &query).await?;

    Ok(Json(page))
}
