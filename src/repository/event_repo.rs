//! Integration event repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::webhook::{IntegrationEvent, IntegrationEventStatus},
    tenant::TenantScope,
};

#[async_trait]
pub trait IntegrationEventRepository: Send + Sync {
    async fn create(&self, event: &IntegrationEvent) -> Result<IntegrationEvent, AppError>;

    async fn find(&self, scope: &TenantScope, id: Uuid) -> Result<Option<IntegrationEvent>, AppError>;

    /// 按接收时间倒序
    async fn list(
        &self,
        scope: &TenantScope,
        status: Option<IntegrationEventStatus>,
        limit: i64,
    ) -> Result<Vec<IntegrationEvent>, AppError>;

    /// 仅当当前状态为 received 时更新；否则返回 None
    async fn complete(
        &self,
        scope: &TenantScope,
        id: Uuid,
        status: IntegrationEventStatus,
        processed_at: DateTime<Utc>,
        error_message: Option<&str>,
    ) -> Result<Option<IntegrationEvent>, AppError>;
}

pub struct PgIntegrationEventRepository {
    db: PgPool,
}

impl PgIntegrationEventRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl IntegrationEventRepository for PgIntegrationEventRepository {
    async fn create(&self, event: &IntegrationEvent) -> Result<IntegrationEvent, AppError> {
        let created = sqlx::query_as::<_, IntegrationEvent>(
            r#"
            INSERT INTO integration_events (
                id, tenant_id, event_name, payload, status, received_at, processed_at, error_message
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(event.id)
        .bind(event.tenant_id)
        .bind(&event.event_name)
        .bind(&event.payload)
        .bind(event.status)
        .bind(event.received_at)
        .bind(event.processed_at)
        .bind(&event.error_message)
        .fetch_one(&self.db)
        .await?;

        Ok(created)
    }

    async fn find(&self, scope: &TenantScope, id: Uuid) -> Result<Option<IntegrationEvent>, AppError> {
        let event = sqlx::query_as::<_, IntegrationEvent>(
            "SELECT * FROM integration_events WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(scope.tenant_id())
        .fetch_optional(&self.db)
        .await?;

        Ok(event)
    }

    async fn list(
        &self,
        scope: &TenantScope,
        status: Option<IntegrationEventStatus>,
        limit: i64,
    ) -> Result<Vec<IntegrationEvent>, AppError> {
        let events = match status {
            Some(status) => {
                sqlx::query_as::<_, IntegrationEvent>(
                    r#"
                    SELECT * FROM integration_events
                    WHERE tenant_id = $1 AND status = $2
                    ORDER BY received_at DESC LIMIT $3
                    "#,
                )
                .bind(scope.tenant_id())
                .bind(status)
                .bind(limit)
                .fetch_all(&self.db)
                .await?
            }
            None => {
                sqlx::query_as::<_, IntegrationEvent>(
                    r#"
                    SELECT * FROM integration_events
                    WHERE tenant_id = $1
                    ORDER BY received_at DESC LIMIT $2
                    "#,
                )
                .bind(scope.tenant_id())
                .bind(limit)
                .fetch_all(&self.db)
                .await?
            }
        };

        Ok(events)
    }

    async fn complete(
        &self,
        scope: &TenantScope,
        id: Uuid,
        status: IntegrationEventStatus,
        processed_at: DateTime<Utc>,
        error_message: Option<&str>,
    ) -> Result<Option<IntegrationEvent>, AppError> {
        let event = sqlx::query_as::<_, IntegrationEvent>(
            r#"
            UPDATE integration_events
            SET status = $3, processed_at = $4, error_message = $5
            WHERE id = $1 AND tenant_id = $2 AND status = 'received'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(scope.tenant_id())
        .bind(status)
        .bind(processed_at)
        .bind(error_message)
        .fetch_optional(&self.db)
        .await?;

        Ok(event)
    }
}
