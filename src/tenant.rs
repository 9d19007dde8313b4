//! 租户隔离
//!
//! 所有租户数据的读写都必须携带 [`TenantScope`]。跨租户命中的实体
//! 统一当作不存在处理，调用方无法区分"别人的"和"没有的"。

use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::{
        audit::AuditLog,
        role::{Group, Role},
        user::User,
        webhook::{IntegrationEvent, WebhookSubscription},
    },
};

/// 当前请求的租户范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantScope {
    tenant_id: Uuid,
}

impl TenantScope {
    pub fn new(tenant_id: Uuid) -> Self {
        Self { tenant_id }
    }

    /// 从已认证的用户得到租户范围；尚未开通租户的用户没有任何租户数据可访问
    pub fn for_actor(actor: &User) -> Result<Self> {
        actor
            .tenant_id
            .map(Self::new)
            .ok_or_else(|| AppError::forbidden("tenant not provisioned"))
    }

    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    pub fn owns<T: TenantOwned>(&self, entity: &T) -> bool {
        entity.owner_tenant() == Some(self.tenant_id)
    }

    /// 缺失或属于其他租户都返回 NotFound
    pub fn guard<T: TenantOwned>(&self, entity: Option<T>, what: &str) -> Result<T> {
        match entity {
            Some(entity) if self.owns(&entity) => Ok(entity),
            Some(_) => {
                tracing::debug!(
                    tenant_id = %self.tenant_id,
                    entity = what,
                    "Cross-tenant access resolved as not found"
                );
                Err(AppError::not_found(what))
            }
            None => Err(AppError::not_found(what)),
        }
    }
}

/// 归属于某个租户的实体
pub trait TenantOwned {
    fn owner_tenant(&self) -> Option<Uuid>;
}

macro_rules! tenant_owned {
    ($($ty:ty),* $(,)?) => {
        $(
            impl TenantOwned for $ty {
                fn owner_tenant(&self) -> Option<Uuid> {
                    Some(self.tenant_id)
                }
            }
        )*
    };
}

tenant_owned!(Role, Group, AuditLog, WebhookSubscription, IntegrationEvent);

impl TenantOwned for User {
    fn owner_tenant(&self) -> Option<Uuid> {
        self.tenant_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn role(tenant_id: Uuid) -> Role {
        Role {
            id: Uuid::new_v4(),
            tenant_id,
            name: "Admin".to_string(),
            description: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_guard_hides_foreign_rows() {
        let mine = TenantScope::new(Uuid::new_v4());
        let other = Uuid::new_v4();

        assert!(mine.guard(Some(role(mine.tenant_id())), "role").is_ok());

        let err = mine.guard(Some(role(other)), "role").unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let err = mine.guard(None::<Role>, "role").unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_unprovisioned_actor_has_no_scope() {
        let now = Utc::now();
        let actor = User {
            id: Uuid::new_v4(),
            tenant_id: None,
            email: "new@example.com".to_string(),
            name: "New".to_string(),
            picture: None,
            is_active: true,
            tier: None,
            created_at: now,
            updated_at: now,
        };
        assert!(matches!(TenantScope::for_actor(&actor), Err(AppError::Forbidden(_))));
    }
}
