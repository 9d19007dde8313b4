//! Permission graph repository (角色/组/权限数据访问)
//!
//! 只提供按 id 的平铺查询，图的展开由权限解析服务完成。

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::unique_violation;
use crate::{
    error::AppError,
    models::role::{Group, Permission, Role},
    tenant::TenantScope,
};

#[async_trait]
pub trait PermissionGraphRepository: Send + Sync {
    // ==================== Permissions ====================

    /// 权限按名称全局唯一；已存在时返回现有记录。resource/action 拼不出合法键时返回 Validation
    async fn upsert_permission(&self, permission: &Permission) -> Result<Permission, AppError>;

    // ==================== Roles / Groups ====================

    async fn create_role(&self, scope: &TenantScope, role: &Role) -> Result<Role, AppError>;

    async fn create_group(&self, scope: &TenantScope, group: &Group) -> Result<Group, AppError>;

    /// 角色或权限不在本租户可见范围内时返回 NotFound
    async fn grant_role_permission(
        &self,
        scope: &TenantScope,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<(), AppError>;

    async fn grant_group_permission(
        &self,
        scope: &TenantScope,
        group_id: Uuid,
        permission_id: Uuid,
    ) -> Result<(), AppError>;

    // ==================== Memberships ====================

    async fn assign_role(&self, scope: &TenantScope, user_id: Uuid, role_id: Uuid) -> Result<(), AppError>;

    async fn assign_group(&self, scope: &TenantScope, user_id: Uuid, group_id: Uuid) -> Result<(), AppError>;

    async fn roles_for_user(&self, scope: &TenantScope, user_id: Uuid) -> Result<Vec<Role>, AppError>;

    async fn groups_for_user(&self, scope: &TenantScope, user_id: Uuid) -> Result<Vec<Group>, AppError>;

    /// 返回 `<resource>.<action>` 键
    async fn role_permission_names(&self, scope: &TenantScope, role_id: Uuid) -> Result<Vec<String>, AppError>;

    async fn group_permission_names(&self, scope: &TenantScope, group_id: Uuid) -> Result<Vec<String>, AppError>;
}

pub struct PgPermissionGraphRepository {
    db: PgPool,
}

impl PgPermissionGraphRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn role_in_tenant(&self, scope: &TenantScope, role_id: Uuid) -> Result<bool, AppError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM roles WHERE id = $1 AND tenant_id = $2)")
                .bind(role_id)
                .bind(scope.tenant_id())
                .fetch_one(&self.db)
                .await?;
        Ok(exists)
    }

    async fn group_in_tenant(&self, scope: &TenantScope, group_id: Uuid) -> Result<bool, AppError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM groups WHERE id = $1 AND tenant_id = $2)")
                .bind(group_id)
                .bind(scope.tenant_id())
                .fetch_one(&self.db)
                .await?;
        Ok(exists)
    }

    async fn user_in_tenant(&self, scope: &TenantScope, user_id: Uuid) -> Result<bool, AppError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1 AND tenant_id = $2)")
                .bind(user_id)
                .bind(scope.tenant_id())
                .fetch_one(&self.db)
                .await?;
        Ok(exists)
    }
}

#[async_trait]
impl PermissionGraphRepository for PgPermissionGraphRepository {
    async fn upsert_permission(&self, permission: &Permission) -> Result<Permission, AppError> {
        permission.check_key()?;

        let permission = sqlx::query_as::<_, Permission>(
            r#"
            INSERT INTO permissions (id, name, resource, action, description)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
            RETURNING *
            "#,
        )
        .bind(permission.id)
        .bind(&permission.name)
        .bind(&permission.resource)
        .bind(&permission.action)
        .bind(&permission.description)
        .fetch_one(&self.db)
        .await?;

        Ok(permission)
    }

    async fn create_role(&self, scope: &TenantScope, role: &Role) -> Result<Role, AppError> {
        sqlx::query_as::<_, Role>(
            r#"
            INSERT INTO roles (id, tenant_id, name, description, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(role.id)
        .bind(scope.tenant_id())
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.created_at)
        .fetch_one(&self.db)
        .await
        .map_err(|e| unique_violation(e, "role"))
    }

    async fn create_group(&self, scope: &TenantScope, group: &Group) -> Result<Group, AppError> {
        sqlx::query_as::<_, Group>(
            r#"
            INSERT INTO groups (id, tenant_id, name, description, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(group.id)
        .bind(scope.tenant_id())
        .bind(&group.name)
        .bind(&group.description)
        .bind(group.created_at)
        .fetch_one(&self.db)
        .await
        .map_err(|e| unique_violation(e, "group"))
    }

    async fn grant_role_permission(
        &self,
        scope: &TenantScope,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<(), AppError> {
        if !self.role_in_tenant(scope, role_id).await? {
            return Err(AppError::not_found("role"));
        }

        sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(role_id)
        .bind(permission_id)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn grant_group_permission(
        &self,
        scope: &TenantScope,
        group_id: Uuid,
        permission_id: Uuid,
    ) -> Result<(), AppError> {
        if !self.group_in_tenant(scope, group_id).await? {
            return Err(AppError::not_found("group"));
        }

        sqlx::query(
            r#"
            INSERT INTO group_permissions (group_id, permission_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(group_id)
        .bind(permission_id)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn assign_role(&self, scope: &TenantScope, user_id: Uuid, role_id: Uuid) -> Result<(), AppError> {
        if !self.user_in_tenant(scope, user_id).await? {
            return Err(AppError::not_found("user"));
        }
        if !self.role_in_tenant(scope, role_id).await? {
            return Err(AppError::not_found("role"));
        }

        sqlx::query("INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(user_id)
            .bind(role_id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    async fn assign_group(&self, scope: &TenantScope, user_id: Uuid, group_id: Uuid) -> Result<(), AppError> {
        if !self.user_in_tenant(scope, user_id).await? {
            return Err(AppError::not_found("user"));
        }
        if !self.group_in_tenant(scope, group_id).await? {
            return Err(AppError::not_found("group"));
        }

        sqlx::query("INSERT INTO user_groups (user_id, group_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(user_id)
            .bind(group_id)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    async fn roles_for_user(&self, scope: &TenantScope, user_id: Uuid) -> Result<Vec<Role>, AppError> {
        let roles = sqlx::query_as::<_, Role>(
            r#"
            SELECT r.* FROM roles r
            JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = $1 AND r.tenant_id = $2
            ORDER BY r.name
            "#,
        )
        .bind(user_id)
        .bind(scope.tenant_id())
        .fetch_all(&self.db)
        .await?;

        Ok(roles)
    }

    async fn groups_for_user(&self, scope: &TenantScope, user_id: Uuid) -> Result<Vec<Group>, AppError> {
        let groups = sqlx::query_as::<_, Group>(
            r#"
            SELECT g.* FROM groups g
            JOIN user_groups ug ON ug.group_id = g.id
            WHERE ug.user_id = $1 AND g.tenant_id = $2
            ORDER BY g.name
            "#,
        )
        .bind(user_id)
        .bind(scope.tenant_id())
        .fetch_all(&self.db)
        .await?;

        Ok(groups)
    }

    async fn role_permission_names(&self, scope: &TenantScope, role_id: Uuid) -> Result<Vec<String>, AppError> {
        let names = sqlx::query_scalar::<_, String>(
            r#"
            SELECT p.resource || '.' || p.action FROM permissions p
            JOIN role_permissions rp ON rp.permission_id = p.id
            JOIN roles r ON r.id = rp.role_id
            WHERE rp.role_id = $1 AND r.tenant_id = $2
            "#,
        )
        .bind(role_id)
        .bind(scope.tenant_id())
        .fetch_all(&self.db)
        .await?;

        Ok(names)
    }

    async fn group_permission_names(&self, scope: &TenantScope, group_id: Uuid) -> Result<Vec<String>, AppError> {
        let names = sqlx::query_scalar::<_, String>(
            r#"
            SELECT p.resource || '.' || p.action FROM permissions p
            JOIN group_permissions gp ON gp.permission_id = p.id
            JOIN groups g ON g.id = gp.group_id
            WHERE gp.group_id = $1 AND g.tenant_id = $2
            "#,
        )
        .bind(group_id)
        .bind(scope.tenant_id())
        .fetch_all(&self.db)
        .await?;

        Ok(names)
    }
}
