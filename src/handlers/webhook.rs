//! Webhook 订阅管理与入站接收的 HTTP 处理器

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    auth::middleware::AuthContext,
    error::AppError,
    middleware::AppState,
    models::webhook::{
        CreateSubscriptionRequest, CreatedSubscriptionResponse, UpdateSubscriptionRequest,
    },
};

pub const TENANT_ID_HEADER: &str = "x-tenant-id";
pub const API_KEY_HEADER: &str = "x-api-key";

/// 列出订阅
pub async fn list_subscriptions(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
) -> Result<impl IntoResponse, AppError> {
    let scope = auth_context.scope()?;
    state
        .permission_service
        .require_permission(&auth_context.actor, &scope, "webhooks.read")
        .await?;

    let subscriptions = state.webhook_service.list(&scope).await?;

    Ok(Json(json!({
        "subscriptions": subscriptions,
        "count": subscriptions.len()
    })))
}

/// 创建订阅，响应中包含仅此一次返回的 secret
pub async fn create_subscription(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Json(req): Json<CreateSubscriptionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let scope = auth_context.scope()?;
    state
        .permission_service
        .require_permission(&auth_context.actor, &scope, "webhooks.create")
        .await?;

    let subscription = state
        .webhook_service
        .create(&scope, req, Some(auth_context.actor.id))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedSubscriptionResponse::from(subscription)),
    ))
}

/// 获取订阅详情
pub async fn get_subscription(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let scope = auth_context.scope()?;
    state
        .permission_service
        .require_permission(&auth_context.actor, &scope, "webhooks.read")
        .await?;

    let subscription = state.webhook_service.get(&scope, id).await?;

    Ok(Json(subscription))
}

/// 更新订阅
pub async fn update_subscription(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateSubscriptionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let scope = auth_context.scope()?;
    state
        .permission_service
        .require_permission(&auth_context.actor, &scope, "webhooks.update")
        .await?;

    let subscription = state
        .webhook_service
        .update(&scope, id, req, Some(auth_context.actor.id))
        .await?;

    Ok(Json(subscription))
}

/// 删除订阅
pub async fn delete_subscription(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let scope = auth_context.scope()?;
    state
        .permission_service
        .require_permission(&auth_context.actor, &scope, "webhooks.delete")
        .await?;

    state
        .webhook_service
        .delete(&scope, id, Some(auth_context.actor.id))
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// 入站接收
///
/// 认证在任何校验之前进行，非法 JSON 视为非对象 payload。
pub async fn receive_inbound(
    State(state): State<Arc<AppState>>,
    Path(event_name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let tenant_id = headers
        .get(TENANT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::authentication("missing X-Tenant-ID header"))?;
    let tenant_id = Uuid::parse_str(tenant_id.trim())
        .map_err(|_| AppError::BadRequest("X-Tenant-ID must be a UUID".to_string()))?;

    let api_key = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|k| !k.is_empty())
        .ok_or_else(|| AppError::authentication("missing X-API-Key header"))?;

    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

    let event = state
        .event_service
        .ingest(tenant_id, api_key, &event_name, payload)
        .await?;

    Ok((StatusCode::CREATED, Json(event)))
}
