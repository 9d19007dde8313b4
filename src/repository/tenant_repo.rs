//! Tenant repository (租户数据访问)

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::unique_violation;
use crate::{error::AppError, models::tenant::Tenant};

#[async_trait]
pub trait TenantRepository: Send + Sync {
    async fn create(&self, tenant: &Tenant) -> Result<Tenant, AppError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Tenant>, AppError>;

    async fn slug_exists(&self, slug: &str) -> Result<bool, AppError>;

    async fn update_api_key(&self, id: Uuid, api_key: &str) -> Result<Option<Tenant>, AppError>;
}

pub struct PgTenantRepository {
    db: PgPool,
}

impl PgTenantRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TenantRepository for PgTenantRepository {
    async fn create(&self, tenant: &Tenant) -> Result<Tenant, AppError> {
        sqlx::query_as::<_, Tenant>(
            r#"
            INSERT INTO tenants (id, name, slug, webhook_api_key, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.slug)
        .bind(&tenant.webhook_api_key)
        .bind(tenant.is_active)
        .bind(tenant.created_at)
        .bind(tenant.updated_at)
        .fetch_one(&self.db)
        .await
        .map_err(|e| unique_violation(e, "tenant slug"))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Tenant>, AppError> {
        let tenant = sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(tenant)
    }

    async fn slug_exists(&self, slug: &str) -> Result<bool, AppError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM tenants WHERE slug = $1)")
                .bind(slug)
                .fetch_one(&self.db)
                .await?;

        Ok(exists)
    }

    async fn update_api_key(&self, id: Uuid, api_key: &str) -> Result<Option<Tenant>, AppError> {
        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            UPDATE tenants SET webhook_api_key = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(api_key)
        .fetch_optional(&self.db)
        .await?;

        Ok(tenant)
    }
}
