//! 入站事件查询与状态流转

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::middleware::AuthContext,
    error::AppError,
    middleware::AppState,
    models::webhook::{IntegrationEventQuery, MarkFailedRequest},
};

/// 列出入站事件
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Query(query): Query<IntegrationEventQuery>,
) -> Result<impl IntoResponse, AppError> {
    query.validate()?;

    let scope = auth_context.scope()?;
    state
        .permission_service
        .require_permission(&auth_context.actor, &scope, "webhooks.read")
        .await?;

    let events = state
        .event_service
        .list(&scope, query.status, query.limit)
        .await?;

    Ok(Json(json!({
        "events": events,
        "count": events.len()
    })))
}

pub async fn get_event(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let scope = auth_context.scope()?;
    state
        .permission_service
        .require_permission(&auth_context.actor, &scope, "webhooks.read")
        .await?;

    let event = state.event_service.get(&scope, id).await?;

    Ok(Json(event))
}

/// received -> processed
pub async fn mark_processed(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let scope = auth_context.scope()?;
    state
        .permission_service
        .require_permission(&auth_context.actor, &scope, "webhooks.update")
        .await?;

    let event = state
        .event_service
        .mark_processed(&scope, id, Some(auth_context.actor.id))
        .await?;

    Ok(Json(event))
}

/// received -> failed
pub async fn mark_failed(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<MarkFailedRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let scope = auth_context.scope()?;
    state
        .permission_service
        .require_permission(&auth_context.actor, &scope, "webhooks.update")
        .await?;

    let event = state
        .event_service
        .mark_failed(&scope, id, &req.error_message, Some(auth_context.actor.id))
        .await?;

    Ok(Json(event))
}
