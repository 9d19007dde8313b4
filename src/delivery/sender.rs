//! 出站 HTTP 发送
//! [`WebhookSender`] 是调度器唯一依赖的发送接口，生产环境使用 reqwest

use async_trait::async_trait;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub const HEADER_SIGNATURE: &str = "X-Webhook-Signature";
pub const HEADER_EVENT_NAME: &str = "X-Event-Name";
pub const HEADER_DELIVERY_ID: &str = "X-Delivery-Id";

/// 一次投递的请求内容，重试时原样复用
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub delivery_id: Uuid,
    pub url: String,
    pub event_name: String,
    pub signature: String,
    pub body: Arc<[u8]>,
}

/// 单次发送失败
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("dns resolution failed: {0}")]
    Dns(String),

    #[error("invalid target url: {0}")]
    InvalidUrl(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("request failed: {0}")]
    Request(String),
}

#[async_trait]
pub trait WebhookSender: Send + Sync {
    /// 2xx 返回 Ok(status)，其余状态码返回 `DeliveryError::Status`
    async fn send(&self, request: &OutboundRequest) -> Result<u16, DeliveryError>;
}

pub struct ReqwestSender {
    client: reqwest::Client,
}

impl ReqwestSender {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("tenant-core/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

/// reqwest 没有单独的 DNS 错误类型，沿错误链查找 resolver 的报错
fn is_dns_failure(err: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(cause) = source {
        let text = cause.to_string().to_lowercase();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return true;
        }
        source = cause.source();
    }
    false
}

fn classify_reqwest(err: reqwest::Error) -> DeliveryError {
    if err.is_timeout() {
        DeliveryError::Timeout
    } else if err.is_builder() {
        DeliveryError::InvalidUrl(err.to_string())
    } else if is_dns_failure(&err) {
        DeliveryError::Dns(err.to_string())
    } else if err.is_connect() {
        DeliveryError::Connect(err.to_string())
    } else {
        DeliveryError::Request(err.to_string())
    }
}

#[async_trait]
impl WebhookSender for ReqwestSender {
    async fn send(&self, request: &OutboundRequest) -> Result<u16, DeliveryError> {
        let url = reqwest::Url::parse(&request.url)
            .map_err(|e| DeliveryError::InvalidUrl(e.to_string()))?;

        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(HEADER_SIGNATURE, &request.signature)
            .header(HEADER_EVENT_NAME, &request.event_name)
            .header(HEADER_DELIVERY_ID, request.delivery_id.to_string())
            .body(request.body.to_vec())
            .send()
            .await
            .map_err(classify_reqwest)?;

        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(DeliveryError::Status(status.as_u16()))
        }
    }
}
