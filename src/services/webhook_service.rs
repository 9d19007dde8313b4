//! Webhook 目录
//!
//! 订阅的增删改查（按租户隔离）、按事件名查找启用的订阅、入站调用方认证。
//! 订阅变更写入审计账本。

use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::ApiKeyGenerator,
    clock::Clock,
    error::{AppError, Result},
    models::webhook::{CreateSubscriptionRequest, UpdateSubscriptionRequest, WebhookSubscription},
    repository::{TenantRepository, WebhookRepository},
    services::audit_service::AuditService,
    tenant::TenantScope,
};

pub struct WebhookService {
    tenants: Arc<dyn TenantRepository>,
    webhooks: Arc<dyn WebhookRepository>,
    audit: Arc<AuditService>,
    clock: Arc<dyn Clock>,
}

impl WebhookService {
    pub fn new(
        tenants: Arc<dyn TenantRepository>,
        webhooks: Arc<dyn WebhookRepository>,
        audit: Arc<AuditService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tenants,
            webhooks,
            audit,
            clock,
        }
    }

    pub async fn list(&self, scope: &TenantScope) -> Result<Vec<WebhookSubscription>> {
        self.webhooks.list(scope).await
    }

    pub async fn get(&self, scope: &TenantScope, id: Uuid) -> Result<WebhookSubscription> {
        scope.guard(self.webhooks.find(scope, id).await?, "webhook subscription")
    }

    /// 创建订阅，secret 由服务端生成
    pub async fn create(
        &self,
        scope: &TenantScope,
        request: CreateSubscriptionRequest,
        actor_id: Option<Uuid>,
    ) -> Result<WebhookSubscription> {
        request.validate().map_err(AppError::from)?;

        let now = self.clock.now();
        let subscription = WebhookSubscription {
            id: Uuid::new_v4(),
            tenant_id: scope.tenant_id(),
            event_name: request.event_name,
            target_url: request.target_url,
            enabled: request.enabled,
            secret: ApiKeyGenerator::webhook_secret(),
            created_at: now,
            updated_at: now,
        };

        let created = self.webhooks.create(&subscription).await?;

        tracing::info!(
            tenant_id = %scope.tenant_id(),
            subscription_id = %created.id,
            event_name = %created.event_name,
            "Webhook subscription created"
        );

        // 审计失败不回滚主操作，错误已在账本内记录
        let _ = self.audit.created(scope, &created, actor_id).await;

        Ok(created)
    }

    pub async fn update(
        &self,
        scope: &TenantScope,
        id: Uuid,
        request: UpdateSubscriptionRequest,
        actor_id: Option<Uuid>,
    ) -> Result<WebhookSubscription> {
        request.validate().map_err(AppError::from)?;

        let before = self.get(scope, id).await?;

        let mut changed = before.clone();
        if let Some(target_url) = request.target_url {
            changed.target_url = target_url;
        }
        if let Some(enabled) = request.enabled {
            changed.enabled = enabled;
        }
        changed.updated_at = self.clock.now();

        let after = scope.guard(
            self.webhooks.update(scope, &changed).await?,
            "webhook subscription",
        )?;

        tracing::info!(
            tenant_id = %scope.tenant_id(),
            subscription_id = %after.id,
            enabled = after.enabled,
            "Webhook subscription updated"
        );

        let _ = self.audit.updated(scope, &before, &after, actor_id).await;

        Ok(after)
    }

    pub async fn delete(&self, scope: &TenantScope, id: Uuid, actor_id: Option<Uuid>) -> Result<()> {
        let existing = self.get(scope, id).await?;

        if !self.webhooks.delete(scope, id).await? {
            return Err(AppError::not_found("webhook subscription"));
        }

        tracing::info!(
            tenant_id = %scope.tenant_id(),
            subscription_id = %id,
            "Webhook subscription deleted"
        );

        let _ = self.audit.deleted(scope, &existing, actor_id).await;

        Ok(())
    }

    /// 启用且事件名匹配的订阅
    pub async fn find_active(&self, scope: &TenantScope, event_name: &str) -> Result<Vec<WebhookSubscription>> {
        self.webhooks.find_active(scope, event_name).await
    }

    /// 入站调用方认证：租户存在、启用，且 API key 完全一致
    pub async fn authenticate_inbound(&self, tenant_id: Uuid, api_key: &str) -> Result<TenantScope> {
        let tenant = self
            .tenants
            .find_by_id(tenant_id)
            .await?
            .ok_or_else(|| AppError::authentication("invalid tenant or API key"))?;

        if !tenant.is_active {
            tracing::warn!(%tenant_id, "Inbound call for inactive tenant");
            return Err(AppError::authentication("invalid tenant or API key"));
        }

        if !ApiKeyGenerator::matches(api_key, &tenant.webhook_api_key) {
            tracing::warn!(
                %tenant_id,
                key_fingerprint = %ApiKeyGenerator::fingerprint(api_key),
                "Inbound API key mismatch"
            );
            return Err(AppError::authentication("invalid tenant or API key"));
        }

        Ok(TenantScope::new(tenant.id))
    }
}
