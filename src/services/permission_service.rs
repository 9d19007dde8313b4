//! 权限检查服务
//!
//! 两种授权模式二选一，由部署配置决定：
//! - `StaticTier`: 用户上的静态等级映射到固定权限表
//! - `Graph`: 用户 -> 角色/组 -> 权限，两层平铺，不支持嵌套
//!
//! 两种模式不会对同一个用户混用。

use std::sync::Arc;

use crate::{
    config::AuthorizationMode,
    error::{AppError, Result},
    models::{
        role::{EffectivePermissions, Group, Role, UNRESTRICTED},
        user::{StaticTier, User},
    },
    repository::PermissionGraphRepository,
    tenant::TenantScope,
};

/// 授权结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthzDecision {
    Allow,
    Deny { reason: String },
}

impl AuthzDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AuthzDecision::Allow)
    }
}

/// 静态等级权限表
pub fn static_tier_permissions(tier: Option<StaticTier>) -> EffectivePermissions {
    let granted: &[&str] = match tier {
        Some(StaticTier::Admin) => &[UNRESTRICTED],
        Some(StaticTier::Manager) => &[
            "contacts.read",
            "contacts.create",
            "contacts.update",
            "contacts.delete",
            "audit.read",
            "webhooks.read",
            "webhooks.create",
        ],
        Some(StaticTier::Agent) => &["contacts.read", "contacts.create", "contacts.update", "audit.read"],
        Some(StaticTier::Viewer) => &["contacts.read", "audit.read"],
        None => &[],
    };

    granted.iter().copied().collect()
}

pub struct PermissionService {
    mode: AuthorizationMode,
    graph: Arc<dyn PermissionGraphRepository>,
}

impl PermissionService {
    pub fn new(mode: AuthorizationMode, graph: Arc<dyn PermissionGraphRepository>) -> Self {
        Self { mode, graph }
    }

    pub fn mode(&self) -> AuthorizationMode {
        self.mode
    }

    /// 计算用户在租户内的有效权限集合
    ///
    /// 停用用户、不属于该租户的用户得到空集合。
    pub async fn resolve(&self, actor: &User, scope: &TenantScope) -> Result<EffectivePermissions> {
        if !actor.is_active || actor.tenant_id != Some(scope.tenant_id()) {
            return Ok(EffectivePermissions::new());
        }

        match self.mode {
            AuthorizationMode::StaticTier => Ok(static_tier_permissions(actor.tier)),
            AuthorizationMode::Graph => self.resolve_graph(actor, scope).await,
        }
    }

    async fn resolve_graph(&self, actor: &User, scope: &TenantScope) -> Result<EffectivePermissions> {
        let mut permissions = EffectivePermissions::new();

        // 用户 -> 角色 -> 权限
        for role in self.graph.roles_for_user(scope, actor.id).await? {
            permissions.extend(self.graph.role_permission_names(scope, role.id).await?);
        }

        // 用户 -> 组 -> 权限
        for group in self.graph.groups_for_user(scope, actor.id).await? {
            permissions.extend(self.graph.group_permission_names(scope, group.id).await?);
        }

        Ok(permissions)
    }

    /// 用户在租户内直接所属的角色和组
    pub async fn memberships(&self, actor: &User, scope: &TenantScope) -> Result<(Vec<Role>, Vec<Group>)> {
        let roles = self.graph.roles_for_user(scope, actor.id).await?;
        let groups = self.graph.groups_for_user(scope, actor.id).await?;
        Ok((roles, groups))
    }

    /// 检查用户是否拥有权限
    pub async fn authorize(
        &self,
        actor: &User,
        scope: &TenantScope,
        required: &str,
    ) -> Result<AuthzDecision> {
        if !actor.is_active {
            return Ok(AuthzDecision::Deny {
                reason: "actor is inactive".to_string(),
            });
        }

        let permissions = self.resolve(actor, scope).await?;

        if permissions.allows(required) {
            Ok(AuthzDecision::Allow)
        } else {
            Ok(AuthzDecision::Deny {
                reason: format!("missing permission {}", required),
            })
        }
    }

    /// 检查权限，如果无权限则返回错误
    pub async fn require_permission(
        &self,
        actor: &User,
        scope: &TenantScope,
        required: &str,
    ) -> Result<()> {
        match self.authorize(actor, scope, required).await? {
            AuthzDecision::Allow => Ok(()),
            AuthzDecision::Deny { reason } => {
                tracing::warn!(
                    user_id = %actor.id,
                    tenant_id = %scope.tenant_id(),
                    permission = %required,
                    reason = %reason,
                    "Permission denied"
                );
                metrics::counter!("authorization_denied_total").increment(1);
                Err(AppError::Forbidden(required.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_tier_is_unrestricted() {
        let permissions = static_tier_permissions(Some(StaticTier::Admin));
        assert!(permissions.is_unrestricted());
        assert!(permissions.allows("anything.at_all"));
    }

    #[test]
    fn test_manager_tier_table() {
        let permissions = static_tier_permissions(Some(StaticTier::Manager));
        assert!(permissions.allows("contacts.delete"));
        assert!(permissions.allows("webhooks.create"));
        assert!(!permissions.allows("webhooks.delete"));
        assert_eq!(permissions.len(), 7);
    }

    #[test]
    fn test_agent_and_viewer_tiers() {
        let agent = static_tier_permissions(Some(StaticTier::Agent));
        assert!(agent.allows("contacts.update"));
        assert!(!agent.allows("contacts.delete"));

        let viewer = static_tier_permissions(Some(StaticTier::Viewer));
        assert!(viewer.allows("contacts.read"));
        assert!(viewer.allows("audit.read"));
        assert!(!viewer.allows("contacts.delete"));
    }

    #[test]
    fn test_no_tier_fails_closed() {
        assert!(static_tier_permissions(None).is_empty());
    }
}
