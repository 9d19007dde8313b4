//! Webhook subscription and integration event models

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::audit::{Auditable, Snapshot};

/// 事件名允许的字符
pub static EVENT_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.:\-]{1,100}$").expect("valid event name regex"));

pub const MAX_TARGET_URL_LEN: u64 = 500;

fn validate_http_scheme(url: &str) -> Result<(), ValidationError> {
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        Ok(())
    } else {
        let mut err = ValidationError::new("scheme");
        err.message = Some("target_url must use http or https".into());
        Err(err)
    }
}

/// 事件名校验（入站路径参数同样适用）
pub fn validate_event_name(name: &str) -> Result<(), ValidationError> {
    if EVENT_NAME_RE.is_match(name) {
        Ok(())
    } else {
        let mut err = ValidationError::new("event_name");
        err.message = Some("event_name must be 1-100 chars of [A-Za-z0-9_.:-]".into());
        Err(err)
    }
}

/// Webhook 订阅
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub event_name: String,
    pub target_url: String,
    pub enabled: bool,
    /// 服务端生成，仅用于出站签名
    #[serde(skip_serializing)]
    pub secret: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Auditable for WebhookSubscription {
    const ENTITY_TYPE: &'static str = "webhook_subscription";

    fn entity_id(&self) -> String {
        self.id.to_string()
    }

    // secret 不进入审计快照
    fn snapshot(&self) -> Snapshot {
        Snapshot::new()
            .field("event_name", self.event_name.clone())
            .field("target_url", self.target_url.clone())
            .field("enabled", self.enabled)
    }
}

/// Create subscription request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateSubscriptionRequest {
    #[validate(custom(function = "validate_event_name"))]
    pub event_name: String,
    #[validate(
        length(max = 500, message = "target_url must be at most 500 characters"),
        url(message = "target_url must be a valid URL"),
        custom(function = "validate_http_scheme")
    )]
    pub target_url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Update subscription request
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateSubscriptionRequest {
    #[validate(
        length(max = 500, message = "target_url must be at most 500 characters"),
        url(message = "target_url must be a valid URL"),
        custom(function = "validate_http_scheme")
    )]
    pub target_url: Option<String>,
    pub enabled: Option<bool>,
}

/// 创建响应，唯一一次返回 secret
#[derive(Debug, Serialize)]
pub struct CreatedSubscriptionResponse {
    #[serde(flatten)]
    pub subscription: WebhookSubscription,
    pub secret: String,
}

impl From<WebhookSubscription> for CreatedSubscriptionResponse {
    fn from(subscription: WebhookSubscription) -> Self {
        let secret = subscription.secret.clone();
        Self {
            subscription,
            secret,
        }
    }
}

/// 集成事件状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "integration_event_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IntegrationEventStatus {
    Received,
    Processed,
    Failed,
}

impl IntegrationEventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationEventStatus::Received => "received",
            IntegrationEventStatus::Processed => "processed",
            IntegrationEventStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, IntegrationEventStatus::Received)
    }

    /// 只允许 received -> processed | failed
    pub fn can_transition_to(&self, next: IntegrationEventStatus) -> bool {
        matches!(
            (self, next),
            (
                IntegrationEventStatus::Received,
                IntegrationEventStatus::Processed | IntegrationEventStatus::Failed
            )
        )
    }
}

/// 入站事件记录
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IntegrationEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub event_name: String,
    pub payload: Value,
    pub status: IntegrationEventStatus,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Auditable for IntegrationEvent {
    const ENTITY_TYPE: &'static str = "integration_event";

    fn entity_id(&self) -> String {
        self.id.to_string()
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot::new()
            .field("event_name", self.event_name.clone())
            .field("status", self.status.as_str())
            .field(
                "processed_at",
                self.processed_at
                    .map(|t| Value::String(t.to_rfc3339()))
                    .unwrap_or(Value::Null),
            )
            .field(
                "error_message",
                self.error_message.clone().map(Value::String).unwrap_or(Value::Null),
            )
    }
}

/// Integration event list query
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct IntegrationEventQuery {
    pub status: Option<IntegrationEventStatus>,
    #[validate(range(min = 1, max = 500, message = "limit must be between 1 and 500"))]
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

/// 标记入站事件处理失败
#[derive(Debug, Deserialize, Validate)]
pub struct MarkFailedRequest {
    #[validate(length(min = 1, max = 2000, message = "error_message must be 1-2000 characters"))]
    pub error_message: String,
}
