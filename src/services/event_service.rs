//! 事件服务
//!
//! 出站：`emit` 查找匹配订阅并把投递任务交给调度器，不等待投递结果。
//! 入站：`ingest` 认证调用方后原样保存 payload，状态为 received。
//! 状态流转 received -> processed | failed 由外部消费方调用。

use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    clock::Clock,
    delivery::{DeliveryDispatcher, DeliveryJob, EmitReport, RejectedDelivery},
    error::{AppError, Result},
    models::webhook::{validate_event_name, IntegrationEvent, IntegrationEventStatus},
    repository::IntegrationEventRepository,
    services::{audit_service::AuditService, webhook_service::WebhookService},
    tenant::TenantScope,
};

fn check_event_name(event_name: &str) -> Result<()> {
    validate_event_name(event_name).map_err(|e| {
        AppError::Validation(format!(
            "event_name: {}",
            e.message.map(|m| m.to_string()).unwrap_or_else(|| e.code.to_string())
        ))
    })
}

pub struct EventService {
    webhooks: Arc<WebhookService>,
    events: Arc<dyn IntegrationEventRepository>,
    dispatcher: Arc<DeliveryDispatcher>,
    audit: Arc<AuditService>,
    clock: Arc<dyn Clock>,
}

impl EventService {
    pub fn new(
        webhooks: Arc<WebhookService>,
        events: Arc<dyn IntegrationEventRepository>,
        dispatcher: Arc<DeliveryDispatcher>,
        audit: Arc<AuditService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            webhooks,
            events,
            dispatcher,
            audit,
            clock,
        }
    }

    // ==================== Outbound ====================

    /// 为每个启用的匹配订阅入队一个投递任务
    pub async fn emit(&self, scope: &TenantScope, event_name: &str, payload: &Value) -> Result<EmitReport> {
        check_event_name(event_name)?;

        let subscriptions = self.webhooks.find_active(scope, event_name).await?;
        let mut report = EmitReport {
            matched: subscriptions.len(),
            ..Default::default()
        };

        if subscriptions.is_empty() {
            tracing::debug!(tenant_id = %scope.tenant_id(), event_name, "No active subscriptions");
            return Ok(report);
        }

        let body: Arc<[u8]> = serde_json::to_vec(payload)
            .map_err(|e| AppError::Internal(format!("Failed to serialize payload: {}", e)))?
            .into();

        for subscription in &subscriptions {
            let job = DeliveryJob::new(subscription, event_name, body.clone());
            let delivery_id = job.delivery_id;

            match self.dispatcher.enqueue(job) {
                Ok(()) => report.enqueued.push(delivery_id),
                Err(e) => report.rejected.push(RejectedDelivery {
                    subscription_id: subscription.id,
                    reason: e.to_string(),
                }),
            }
        }

        tracing::info!(
            tenant_id = %scope.tenant_id(),
            event_name,
            matched = report.matched,
            enqueued = report.enqueued.len(),
            rejected = report.rejected.len(),
            "Event emitted"
        );

        Ok(report)
    }

    // ==================== Inbound ====================

    /// 认证调用方并保存入站事件
    pub async fn ingest(
        &self,
        tenant_id: Uuid,
        api_key: &str,
        event_name: &str,
        payload: Value,
    ) -> Result<IntegrationEvent> {
        let scope = self.webhooks.authenticate_inbound(tenant_id, api_key).await?;

        check_event_name(event_name)?;
        if !payload.is_object() {
            return Err(AppError::validation("payload must be a JSON object"));
        }

        let event = IntegrationEvent {
            id: Uuid::new_v4(),
            tenant_id: scope.tenant_id(),
            event_name: event_name.to_string(),
            payload,
            status: IntegrationEventStatus::Received,
            received_at: self.clock.now(),
            processed_at: None,
            error_message: None,
        };

        let stored = self.events.create(&event).await?;

        tracing::info!(
            tenant_id = %stored.tenant_id,
            event_id = %stored.id,
            event_name = %stored.event_name,
            "Integration event received"
        );

        Ok(stored)
    }

    pub async fn get(&self, scope: &TenantScope, id: Uuid) -> Result<IntegrationEvent> {
        scope.guard(self.events.find(scope, id).await?, "integration event")
    }

    pub async fn list(
        &self,
        scope: &TenantScope,
        status: Option<IntegrationEventStatus>,
        limit: i64,
    ) -> Result<Vec<IntegrationEvent>> {
        self.events.list(scope, status, limit).await
    }

    // ==================== Transitions ====================

    pub async fn mark_processed(
        &self,
        scope: &TenantScope,
        id: Uuid,
        actor_id: Option<Uuid>,
    ) -> Result<IntegrationEvent> {
        self.complete(scope, id, IntegrationEventStatus::Processed, None, actor_id)
            .await
    }

    pub async fn mark_failed(
        &self,
        scope: &TenantScope,
        id: Uuid,
        error_message: &str,
        actor_id: Option<Uuid>,
    ) -> Result<IntegrationEvent> {
        self.complete(scope, id, IntegrationEventStatus::Failed, Some(error_message), actor_id)
            .await
    }

    async fn complete(
        &self,
        scope: &TenantScope,
        id: Uuid,
        next: IntegrationEventStatus,
        error_message: Option<&str>,
        actor_id: Option<Uuid>,
    ) -> Result<IntegrationEvent> {
        let before = self.get(scope, id).await?;

        if before.status.is_terminal() {
            return Err(AppError::Conflict(format!(
                "integration event is already {}",
                before.status.as_str()
            )));
        }

        // 条件更新，并发的另一方已经完成时返回 None
        let after = self
            .events
            .complete(scope, id, next, self.clock.now(), error_message)
            .await?
            .ok_or_else(|| AppError::conflict("integration event is no longer received"))?;

        tracing::info!(
            tenant_id = %scope.tenant_id(),
            event_id = %id,
            status = after.status.as_str(),
            "Integration event completed"
        );

        let _ = self.audit.updated(scope, &before, &after, actor_id).await;

        Ok(after)
    }
}
