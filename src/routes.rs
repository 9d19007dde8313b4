//! 路由注册
//! 创建所有 API 路由并应用中间件

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::{auth::middleware::auth_middleware, handlers, middleware::AppState};

/// 请求体上限（入站 payload 与管理接口共用）
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// 创建应用路由
pub fn create_router(state: Arc<AppState>) -> Router {
    // 公开端点（健康检查、登录）
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/api/v1/auth/session", post(handlers::auth::create_session));

    // 入站接收：以租户 ID + API key 认证，不走会话/JWT
    let inbound_routes = Router::new().route(
        "/api/v1/webhooks/inbound/{event_name}",
        post(handlers::webhook::receive_inbound),
    );

    // 需要认证的路由
    let authenticated_routes = Router::new()
        // 当前用户信息
        .route("/api/v1/auth/me", get(handlers::auth::get_current_user))
        .route("/api/v1/auth/logout", post(handlers::auth::logout))

        // Webhook 订阅
        .route(
            "/api/v1/webhooks/subscriptions",
            get(handlers::webhook::list_subscriptions)
                .post(handlers::webhook::create_subscription)
        )
        .route(
            "/api/v1/webhooks/subscriptions/{id}",
            get(handlers::webhook::get_subscription)
                .put(handlers::webhook::update_subscription)
                .delete(handlers::webhook::delete_subscription)
        )

        // 入站事件
        .route("/api/v1/integration-events", get(handlers::integration_event::list_events))
        .route("/api/v1/integration-events/{id}", get(handlers::integration_event::get_event))
        .route(
            "/api/v1/integration-events/{id}/processed",
            post(handlers::integration_event::mark_processed)
        )
        .route(
            "/api/v1/integration-events/{id}/failed",
            post(handlers::integration_event::mark_failed)
        )

        // 审计日志（需要审计权限）
        .route("/api/v1/audit/logs", get(handlers::audit::list_audit_logs))

        // 租户管理
        .route("/api/v1/tenant/api-key/rotate", post(handlers::tenant::rotate_api_key))
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth_middleware));

    // 组合所有路由
    Router::new()
        .merge(public_routes)
        .merge(inbound_routes)
        .merge(authenticated_routes)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(crate::middleware::request_tracking_middleware))
        .with_state(state)
}
