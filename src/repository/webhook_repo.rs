//! Webhook subscription repository

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{error::AppError, models::webhook::WebhookSubscription, tenant::TenantScope};

#[async_trait]
pub trait WebhookRepository: Send + Sync {
    async fn create(&self, subscription: &WebhookSubscription) -> Result<WebhookSubscription, AppError>;

    async fn find(&self, scope: &TenantScope, id: Uuid) -> Result<Option<WebhookSubscription>, AppError>;

    async fn list(&self, scope: &TenantScope) -> Result<Vec<WebhookSubscription>, AppError>;

    /// 只更新 target_url / enabled
    async fn update(
        &self,
        scope: &TenantScope,
        subscription: &WebhookSubscription,
    ) -> Result<Option<WebhookSubscription>, AppError>;

    async fn delete(&self, scope: &TenantScope, id: Uuid) -> Result<bool, AppError>;

    /// 启用且事件名匹配的订阅，不保证顺序
    async fn find_active(
        &self,
        scope: &TenantScope,
        event_name: &str,
    ) -> Result<Vec<WebhookSubscription>, AppError>;
}

pub struct PgWebhookRepository {
    db: PgPool,
}

impl PgWebhookRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl WebhookRepository for PgWebhookRepository {
    async fn create(&self, subscription: &WebhookSubscription) -> Result<WebhookSubscription, AppError> {
        let created = sqlx::query_as::<_, WebhookSubscription>(
            r#"
            INSERT INTO webhook_subscriptions (
                id, tenant_id, event_name, target_url, enabled, secret, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.tenant_id)
        .bind(&subscription.event_name)
        .bind(&subscription.target_url)
        .bind(subscription.enabled)
        .bind(&subscription.secret)
        .bind(subscription.created_at)
        .bind(subscription.updated_at)
        .fetch_one(&self.db)
        .await?;

        Ok(created)
    }

    async fn find(&self, scope: &TenantScope, id: Uuid) -> Result<Option<WebhookSubscription>, AppError> {
        let subscription = sqlx::query_as::<_, WebhookSubscription>(
            "SELECT * FROM webhook_subscriptions WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(scope.tenant_id())
        .fetch_optional(&self.db)
        .await?;

        Ok(subscription)
    }

    async fn list(&self, scope: &TenantScope) -> Result<Vec<WebhookSubscription>, AppError> {
        let subscriptions = sqlx::query_as::<_, WebhookSubscription>(
            "SELECT * FROM webhook_subscriptions WHERE tenant_id = $1 ORDER BY created_at DESC",
        )
        .bind(scope.tenant_id())
        .fetch_all(&self.db)
        .await?;

        Ok(subscriptions)
    }

    async fn update(
        &self,
        scope: &TenantScope,
        subscription: &WebhookSubscription,
    ) -> Result<Option<WebhookSubscription>, AppError> {
        let updated = sqlx::query_as::<_, WebhookSubscription>(
            r#"
            UPDATE webhook_subscriptions
            SET target_url = $3, enabled = $4, updated_at = $5
            WHERE id = $1 AND tenant_id = $2
            RETURNING *
            "#,
        )
        .bind(subscription.id)
        .bind(scope.tenant_id())
        .bind(&subscription.target_url)
        .bind(subscription.enabled)
        .bind(subscription.updated_at)
        .fetch_optional(&self.db)
        .await?;

        Ok(updated)
    }

    async fn delete(&self, scope: &TenantScope, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM webhook_subscriptions WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(scope.tenant_id())
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_active(
        &self,
        scope: &TenantScope,
        event_name: &str,
    ) -> Result<Vec<WebhookSubscription>, AppError> {
        let subscriptions = sqlx::query_as::<_, WebhookSubscription>(
            r#"
            SELECT * FROM webhook_subscriptions
            WHERE tenant_id = $1 AND event_name = $2 AND enabled = TRUE
            "#,
        )
        .bind(scope.tenant_id())
        .bind(event_name)
        .fetch_all(&self.db)
        .await?;

        Ok(subscriptions)
    }
}
