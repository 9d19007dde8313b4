//! 服务装配（AppState）与请求追踪中间件

use axum::{
    extract::{MatchedPath, Request},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    auth::{
        authenticator::{Authenticator, JwtAuthenticator, SessionAuthenticator},
        identity::{HttpIdentityProvider, IdentityProvider},
        jwt::JwtService,
    },
    clock::Clock,
    config::{AppConfig, AuthenticatorKind},
    delivery::{DeliveryDispatcher, WebhookSender},
    error::Result,
    repository::Repositories,
    services::{
        AuditService, EventService, PermissionService, SessionService, TenantService,
        WebhookService,
    },
};

/// 所有 handler 共享的服务集合
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    /// 内存存储运行时为空
    pub db: Option<PgPool>,
    pub authenticator: Arc<dyn Authenticator>,
    /// 仅 JWT 模式下存在，登录时签发访问令牌
    pub jwt: Option<Arc<JwtService>>,
    /// 未配置 `security.identity_url` 时为空
    pub identity: Option<Arc<dyn IdentityProvider>>,
    pub permission_service: Arc<PermissionService>,
    pub audit_service: Arc<AuditService>,
    pub webhook_service: Arc<WebhookService>,
    pub event_service: Arc<EventService>,
    pub session_service: Arc<SessionService>,
    pub tenant_service: Arc<TenantService>,
    pub dispatcher: Arc<DeliveryDispatcher>,
}

impl AppState {
    /// 按配置装配全部服务并启动投递调度器
    pub fn build(
        config: AppConfig,
        repos: Repositories,
        db: Option<PgPool>,
        clock: Arc<dyn Clock>,
        sender: Arc<dyn WebhookSender>,
    ) -> Result<Self> {
        let (authenticator, jwt): (Arc<dyn Authenticator>, Option<Arc<JwtService>>) =
            match config.security.authenticator {
                AuthenticatorKind::Session => (
                    Arc::new(SessionAuthenticator::new(
                        repos.sessions.clone(),
                        repos.users.clone(),
                        clock.clone(),
                    )),
                    None,
                ),
                AuthenticatorKind::Jwt => {
                    let jwt = Arc::new(JwtService::from_config(&config)?);
                    (
                        Arc::new(JwtAuthenticator::new(jwt.clone(), repos.users.clone())),
                        Some(jwt),
                    )
                }
            };

        let identity = match &config.security.identity_url {
            Some(url) => Some(Arc::new(HttpIdentityProvider::new(url, IDENTITY_TIMEOUT)?)
                as Arc<dyn IdentityProvider>),
            None => None,
        };

        let permission_service = Arc::new(PermissionService::new(
            config.security.authorization_mode,
            repos.graph.clone(),
        ));
        let audit_service = Arc::new(AuditService::new(repos.audit.clone(), clock.clone()));
        let webhook_service = Arc::new(WebhookService::new(
            repos.tenants.clone(),
            repos.webhooks.clone(),
            audit_service.clone(),
            clock.clone(),
        ));
        let dispatcher = Arc::new(DeliveryDispatcher::start(&config.webhook, sender));
        let event_service = Arc::new(EventService::new(
            webhook_service.clone(),
            repos.events.clone(),
            dispatcher.clone(),
            audit_service.clone(),
            clock.clone(),
        ));
        let session_service = Arc::new(SessionService::new(
            repos.sessions.clone(),
            clock.clone(),
            config.security.session_ttl_secs,
        ));
        let tenant_service = Arc::new(TenantService::new(
            repos.tenants.clone(),
            repos.users.clone(),
            repos.provisioning.clone(),
            clock,
        ));

        tracing::info!(
            authenticator = ?config.security.authenticator,
            authorization_mode = ?config.security.authorization_mode,
            "services wired"
        );

        Ok(Self {
            config,
            db,
            authenticator,
            jwt,
            identity,
            permission_service,
            audit_service,
            webhook_service,
            event_service,
            session_service,
            tenant_service,
            dispatcher,
        })
    }

    /// 替换身份提供方（测试与本地联调用）
    pub fn with_identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(provider);
        self
    }
}

const IDENTITY_TIMEOUT: Duration = Duration::from_secs(10);

const TRACE_ID_HEADER: &str = "x-trace-id";
const REQUEST_ID_HEADER: &str = "x-request-id";

tokio::task_local! {
    static REQUEST_ID: String;
}

/// 当前请求的 request_id；不在 [`request_tracking_middleware`] 内时为 None
pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(|id| id.clone()).ok()
}

/// 每个请求一个 span：沿用调用方的 x-trace-id，request_id 总是新生成
pub async fn request_tracking_middleware(req: Request, next: Next) -> Response {
    let trace_id = inbound_trace_id(req.headers()).unwrap_or_else(|| Uuid::new_v4().to_string());
    let request_id = Uuid::new_v4().to_string();
    let method = req.method().clone();
    // 指标按路由模板聚合，未匹配的路径归为一类
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let span = tracing::info_span!(
        "request",
        trace_id = %trace_id,
        request_id = %request_id,
        method = %method,
        route = %route,
    );

    async move {
        let started = Instant::now();
        let mut response = REQUEST_ID.scope(request_id.clone(), next.run(req)).await;
        let elapsed = started.elapsed();
        let status = response.status();

        metrics::counter!(
            "http_requests_total",
            "method" => method.to_string(),
            "route" => route.clone(),
            "status" => status.as_u16().to_string()
        )
        .increment(1);
        metrics::histogram!("http_request_duration_seconds", "route" => route)
            .record(elapsed.as_secs_f64());

        tracing::info!(status = status.as_u16(), elapsed_ms = elapsed.as_millis() as u64, "handled");

        let headers = response.headers_mut();
        for (name, value) in [(TRACE_ID_HEADER, &trace_id), (REQUEST_ID_HEADER, &request_id)] {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.insert(name, value);
            }
        }
        response
    }
    .instrument(span)
    .await
}

/// 长度 1..=128 的可见 ASCII 才沿用
fn inbound_trace_id(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(TRACE_ID_HEADER)?.to_str().ok()?;
    let usable = !raw.is_empty() && raw.len() <= 128 && raw.bytes().all(|b| b.is_ascii_graphic());
    usable.then(|| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_id_visible_inside_scope_only() {
        assert_eq!(current_request_id(), None);

        let seen = REQUEST_ID
            .scope("req-1".to_string(), async { current_request_id() })
            .await;
        assert_eq!(seen.as_deref(), Some("req-1"));
    }

    #[test]
    fn test_inbound_trace_id_kept() {
        let mut headers = HeaderMap::new();
        headers.insert(TRACE_ID_HEADER, HeaderValue::from_static("trace-abc"));
        assert_eq!(inbound_trace_id(&headers).as_deref(), Some("trace-abc"));
    }

    #[test]
    fn test_unusable_trace_id_ignored() {
        assert_eq!(inbound_trace_id(&HeaderMap::new()), None);

        let mut headers = HeaderMap::new();
        headers.insert(TRACE_ID_HEADER, HeaderValue::from_static("has space"));
        assert_eq!(inbound_trace_id(&headers), None);

        headers.insert(TRACE_ID_HEADER, HeaderValue::from_str(&"t".repeat(129)).unwrap());
        assert_eq!(inbound_trace_id(&headers), None);
    }
}
