//! Tenant provisioning repository
//!
//! 租户、所有者、`*.*` 权限、Admin 角色及其授权在同一个事务内写入，
//! 任一步失败时全部回滚，不会留下没有所有者的租户。

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::unique_violation;
use crate::{
    error::AppError,
    models::{
        role::{Permission, Role},
        tenant::Tenant,
        user::User,
    },
};

/// 一次开通需要写入的全部行
#[derive(Debug, Clone)]
pub struct ProvisioningPlan {
    pub tenant: Tenant,
    pub owner: User,
    /// 已存在同名权限时沿用已有记录
    pub unrestricted: Permission,
    pub admin_role: Role,
}

#[async_trait]
pub trait ProvisioningRepository: Send + Sync {
    /// slug 或 email 冲突返回 Conflict，此时没有任何行被写入
    async fn provision_tenant(&self, plan: &ProvisioningPlan) -> Result<(Tenant, User), AppError>;
}

pub struct PgProvisioningRepository {
    db: PgPool,
}

impl PgProvisioningRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProvisioningRepository for PgProvisioningRepository {
    async fn provision_tenant(&self, plan: &ProvisioningPlan) -> Result<(Tenant, User), AppError> {
        plan.unrestricted.check_key()?;

        // 未 commit 的事务在 drop 时回滚
        let mut tx = self.db.begin().await?;

        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            INSERT INTO tenants (id, name, slug, webhook_api_key, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(plan.tenant.id)
        .bind(&plan.tenant.name)
        .bind(&plan.tenant.slug)
        .bind(&plan.tenant.webhook_api_key)
        .bind(plan.tenant.is_active)
        .bind(plan.tenant.created_at)
        .bind(plan.tenant.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| unique_violation(e, "tenant slug"))?;

        let owner = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, tenant_id, email, name, picture, is_active, tier, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(plan.owner.id)
        .bind(tenant.id)
        .bind(&plan.owner.email)
        .bind(&plan.owner.name)
        .bind(&plan.owner.picture)
        .bind(plan.owner.is_active)
        .bind(plan.owner.tier)
        .bind(plan.owner.created_at)
        .bind(plan.owner.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| unique_violation(e, "user email"))?;

        let permission_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO permissions (id, name, resource, action, description)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            "#,
        )
        .bind(plan.unrestricted.id)
        .bind(&plan.unrestricted.name)
        .bind(&plan.unrestricted.resource)
        .bind(&plan.unrestricted.action)
        .bind(&plan.unrestricted.description)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO roles (id, tenant_id, name, description, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(plan.admin_role.id)
        .bind(tenant.id)
        .bind(&plan.admin_role.name)
        .bind(&plan.admin_role.description)
        .bind(plan.admin_role.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2)")
            .bind(plan.admin_role.id)
            .bind(permission_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2)")
            .bind(owner.id)
            .bind(plan.admin_role.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok((tenant, owner))
    }
}
