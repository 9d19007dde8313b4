//! Database repository layer
//!
//! 每个聚合一个 trait，提供 Postgres 实现和内存实现（测试与本地运行）。
//! 租户数据相关的方法都要求 [`TenantScope`](crate::tenant::TenantScope)。

pub mod audit_repo;
pub mod event_repo;
pub mod memory;
pub mod provisioning_repo;
pub mod role_repo;
pub mod tenant_repo;
pub mod user_repo;
pub mod webhook_repo;

pub use audit_repo::*;
pub use event_repo::*;
pub use memory::InMemoryStore;
pub use provisioning_repo::*;
pub use role_repo::*;
pub use tenant_repo::*;
pub use user_repo::*;
pub use webhook_repo::*;

use crate::error::AppError;
use sqlx::PgPool;
use std::sync::Arc;

/// 仓储集合，服务层通过它拿到各个 trait 对象
#[derive(Clone)]
pub struct Repositories {
    pub tenants: Arc<dyn TenantRepository>,
    pub users: Arc<dyn UserRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub graph: Arc<dyn PermissionGraphRepository>,
    pub provisioning: Arc<dyn ProvisioningRepository>,
    pub audit: Arc<dyn AuditRepository>,
    pub webhooks: Arc<dyn WebhookRepository>,
    pub events: Arc<dyn IntegrationEventRepository>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            tenants: Arc::new(PgTenantRepository::new(pool.clone())),
            users: Arc::new(PgUserRepository::new(pool.clone())),
            sessions: Arc::new(PgSessionRepository::new(pool.clone())),
            graph: Arc::new(PgPermissionGraphRepository::new(pool.clone())),
            provisioning: Arc::new(PgProvisioningRepository::new(pool.clone())),
            audit: Arc::new(PgAuditRepository::new(pool.clone())),
            webhooks: Arc::new(PgWebhookRepository::new(pool.clone())),
            events: Arc::new(PgIntegrationEventRepository::new(pool)),
        }
    }

    pub fn in_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            tenants: store.clone(),
            users: store.clone(),
            sessions: store.clone(),
            graph: store.clone(),
            provisioning: store.clone(),
            audit: store.clone(),
            webhooks: store.clone(),
            events: store,
        }
    }
}

/// 唯一约束冲突转换为 Conflict，其余保持数据库错误
pub(crate) fn unique_violation(e: sqlx::Error, what: &str) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict(format!("{} already exists", what))
        }
        _ => AppError::Database(e),
    }
}
