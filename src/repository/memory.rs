//! 内存仓储
//!
//! 所有表放在一把锁后面，多对多关系使用按 id 索引的表
//! （角色 id -> 权限 id 集合，用户 id -> 角色 id 集合），不保存反向引用。
//! 用于测试与无数据库的本地运行。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{
    AuditRepository, IntegrationEventRepository, PermissionGraphRepository, ProvisioningPlan,
    ProvisioningRepository, SessionRepository, TenantRepository, UserRepository, WebhookRepository,
};
use crate::{
    error::AppError,
    models::{
        audit::{AuditLog, AuditLogFilters},
        role::{Group, Permission, Role},
        tenant::Tenant,
        user::{User, UserSession},
        webhook::{IntegrationEvent, IntegrationEventStatus, WebhookSubscription},
    },
    tenant::TenantScope,
};

#[derive(Default, Clone)]
struct Tables {
    tenants: HashMap<Uuid, Tenant>,
    users: HashMap<Uuid, User>,
    sessions: HashMap<Uuid, UserSession>,
    permissions: HashMap<Uuid, Permission>,
    roles: HashMap<Uuid, Role>,
    groups: HashMap<Uuid, Group>,
    role_permissions: HashMap<Uuid, BTreeSet<Uuid>>,
    group_permissions: HashMap<Uuid, BTreeSet<Uuid>>,
    user_roles: HashMap<Uuid, BTreeSet<Uuid>>,
    user_groups: HashMap<Uuid, BTreeSet<Uuid>>,
    // 追加写
    audit_logs: Vec<AuditLog>,
    subscriptions: HashMap<Uuid, WebhookSubscription>,
    events: HashMap<Uuid, IntegrationEvent>,
}

impl Tables {
    fn user_in(&self, scope: &TenantScope, user_id: Uuid) -> bool {
        self.users
            .get(&user_id)
            .is_some_and(|u| u.tenant_id == Some(scope.tenant_id()))
    }

    fn role_in(&self, scope: &TenantScope, role_id: Uuid) -> bool {
        self.roles
            .get(&role_id)
            .is_some_and(|r| r.tenant_id == scope.tenant_id())
    }

    fn group_in(&self, scope: &TenantScope, group_id: Uuid) -> bool {
        self.groups
            .get(&group_id)
            .is_some_and(|g| g.tenant_id == scope.tenant_id())
    }

    fn permission_names(&self, ids: Option<&BTreeSet<Uuid>>) -> Vec<String> {
        ids.into_iter()
            .flatten()
            .filter_map(|id| self.permissions.get(id))
            .map(Permission::key)
            .collect()
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    fail_audit_writes: AtomicBool,
    fail_role_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 模拟审计存储故障
    pub fn set_audit_write_failure(&self, failing: bool) {
        self.fail_audit_writes.store(failing, Ordering::SeqCst);
    }

    /// 模拟角色写入故障，开通流程在租户写入之后失败
    pub fn set_role_write_failure(&self, failing: bool) {
        self.fail_role_writes.store(failing, Ordering::SeqCst);
    }

    fn role_write_failure(&self) -> Result<(), AppError> {
        if self.fail_role_writes.load(Ordering::SeqCst) {
            return Err(AppError::internal_error("role store unavailable"));
        }
        Ok(())
    }

    pub fn tenant_count(&self) -> usize {
        self.lock().tenants.len()
    }

    /// 全部租户的审计记录数
    pub fn audit_log_count(&self) -> usize {
        self.lock().audit_logs.len()
    }

    /// 全部租户的集成事件数
    pub fn integration_event_count(&self) -> usize {
        self.lock().events.len()
    }

    /// 直接写入租户/用户，测试夹具使用
    pub fn insert_tenant(&self, tenant: Tenant) {
        self.lock().tenants.insert(tenant.id, tenant);
    }

    pub fn insert_user(&self, user: User) {
        self.lock().users.insert(user.id, user);
    }
}

#[async_trait]
impl TenantRepository for InMemoryStore {
    async fn create(&self, tenant: &Tenant) -> Result<Tenant, AppError> {
        let mut tables = self.lock();
        if tables.tenants.values().any(|t| t.slug == tenant.slug) {
            return Err(AppError::conflict("tenant slug already exists"));
        }
        tables.tenants.insert(tenant.id, tenant.clone());
        Ok(tenant.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Tenant>, AppError> {
        Ok(self.lock().tenants.get(&id).cloned())
    }

    async fn slug_exists(&self, slug: &str) -> Result<bool, AppError> {
        Ok(self.lock().tenants.values().any(|t| t.slug == slug))
    }

    async fn update_api_key(&self, id: Uuid, api_key: &str) -> Result<Option<Tenant>, AppError> {
        let mut tables = self.lock();
        Ok(tables.tenants.get_mut(&id).map(|tenant| {
            tenant.webhook_api_key = api_key.to_string();
            tenant.updated_at = Utc::now();
            tenant.clone()
        }))
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn create(&self, user: &User) -> Result<User, AppError> {
        let mut tables = self.lock();
        if tables.users.values().any(|u| u.email == user.email) {
            return Err(AppError::conflict("user email already exists"));
        }
        tables.users.insert(user.id, user.clone());
        Ok(user.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        Ok(self.lock().users.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        Ok(self.lock().users.values().find(|u| u.email == email).cloned())
    }
}

#[async_trait]
impl SessionRepository for InMemoryStore {
    async fn create(&self, session: &UserSession) -> Result<UserSession, AppError> {
        self.lock().sessions.insert(session.id, session.clone());
        Ok(session.clone())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<UserSession>, AppError> {
        Ok(self
            .lock()
            .sessions
            .values()
            .find(|s| s.session_token == token)
            .cloned())
    }

    async fn delete_for_user(&self, user_id: Uuid) -> Result<u64, AppError> {
        let mut tables = self.lock();
        let before = tables.sessions.len();
        tables.sessions.retain(|_, s| s.user_id != user_id);
        Ok((before - tables.sessions.len()) as u64)
    }
}

#[async_trait]
impl PermissionGraphRepository for InMemoryStore {
    async fn upsert_permission(&self, permission: &Permission) -> Result<Permission, AppError> {
        permission.check_key()?;
        let mut tables = self.lock();
        if let Some(existing) = tables.permissions.values().find(|p| p.name == permission.name) {
            return Ok(existing.clone());
        }
        tables.permissions.insert(permission.id, permission.clone());
        Ok(permission.clone())
    }

    async fn create_role(&self, scope: &TenantScope, role: &Role) -> Result<Role, AppError> {
        self.role_write_failure()?;
        let mut tables = self.lock();
        if tables
            .roles
            .values()
            .any(|r| r.tenant_id == scope.tenant_id() && r.name == role.name)
        {
            return Err(AppError::conflict("role already exists"));
        }
        let role = Role {
            tenant_id: scope.tenant_id(),
            ..role.clone()
        };
        tables.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn create_group(&self, scope: &TenantScope, group: &Group) -> Result<Group, AppError> {
        let mut tables = self.lock();
        if tables
            .groups
            .values()
            .any(|g| g.tenant_id == scope.tenant_id() && g.name == group.name)
        {
            return Err(AppError::conflict("group already exists"));
        }
        let group = Group {
            tenant_id: scope.tenant_id(),
            ..group.clone()
        };
        tables.groups.insert(group.id, group.clone());
        Ok(group)
    }

    async fn grant_role_permission(
        &self,
        scope: &TenantScope,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> Result<(), AppError> {
        let mut tables = self.lock();
        if !tables.role_in(scope, role_id) {
            return Err(AppError::not_found("role"));
        }
        if !tables.permissions.contains_key(&permission_id) {
            return Err(AppError::not_found("permission"));
        }
        tables.role_permissions.entry(role_id).or_default().insert(permission_id);
        Ok(())
    }

    async fn grant_group_permission(
        &self,
        scope: &TenantScope,
        group_id: Uuid,
        permission_id: Uuid,
    ) -> Result<(), AppError> {
        let mut tables = self.lock();
        if !tables.group_in(scope, group_id) {
            return Err(AppError::not_found("group"));
        }
        if !tables.permissions.contains_key(&permission_id) {
            return Err(AppError::not_found("permission"));
        }
        tables.group_permissions.entry(group_id).or_default().insert(permission_id);
        Ok(())
    }

    async fn assign_role(&self, scope: &TenantScope, user_id: Uuid, role_id: Uuid) -> Result<(), AppError> {
        let mut tables = self.lock();
        if !tables.user_in(scope, user_id) {
            return Err(AppError::not_found("user"));
        }
        if !tables.role_in(scope, role_id) {
            return Err(AppError::not_found("role"));
        }
        tables.user_roles.entry(user_id).or_default().insert(role_id);
        Ok(())
    }

    async fn assign_group(&self, scope: &TenantScope, user_id: Uuid, group_id: Uuid) -> Result<(), AppError> {
        let mut tables = self.lock();
        if !tables.user_in(scope, user_id) {
            return Err(AppError::not_found("user"));
        }
        if !tables.group_in(scope, group_id) {
            return Err(AppError::not_found("group"));
        }
        tables.user_groups.entry(user_id).or_default().insert(group_id);
        Ok(())
    }

    async fn roles_for_user(&self, scope: &TenantScope, user_id: Uuid) -> Result<Vec<Role>, AppError> {
        let tables = self.lock();
        let mut roles: Vec<Role> = tables
            .user_roles
            .get(&user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.roles.get(id))
            .filter(|r| r.tenant_id == scope.tenant_id())
            .cloned()
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn groups_for_user(&self, scope: &TenantScope, user_id: Uuid) -> Result<Vec<Group>, AppError> {
        let tables = self.lock();
        let mut groups: Vec<Group> = tables
            .user_groups
            .get(&user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| tables.groups.get(id))
            .filter(|g| g.tenant_id == scope.tenant_id())
            .cloned()
            .collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(groups)
    }

    async fn role_permission_names(&self, scope: &TenantScope, role_id: Uuid) -> Result<Vec<String>, AppError> {
        let tables = self.lock();
        if !tables.role_in(scope, role_id) {
            return Ok(Vec::new());
        }
        Ok(tables.permission_names(tables.role_permissions.get(&role_id)))
    }

    async fn group_permission_names(&self, scope: &TenantScope, group_id: Uuid) -> Result<Vec<String>, AppError> {
        let tables = self.lock();
        if !tables.group_in(scope, group_id) {
            return Ok(Vec::new());
        }
        Ok(tables.permission_names(tables.group_permissions.get(&group_id)))
    }
}

fn audit_matches(log: &AuditLog, scope: &TenantScope, filters: &AuditLogFilters) -> bool {
    log.tenant_id == scope.tenant_id()
        && filters.entity_type.as_ref().map_or(true, |t| &log.entity_type == t)
        && filters.entity_id.as_ref().map_or(true, |id| &log.entity_id == id)
        && filters.action.map_or(true, |a| log.action == a)
}

#[async_trait]
impl AuditRepository for InMemoryStore {
    async fn insert(&self, log: &AuditLog) -> Result<(), AppError> {
        if self.fail_audit_writes.load(Ordering::SeqCst) {
            return Err(AppError::internal_error("audit store unavailable"));
        }
        self.lock().audit_logs.push(log.clone());
        Ok(())
    }

    async fn query(
        &self,
        scope: &TenantScope,
        filters: &AuditLogFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditLog>, AppError> {
        let tables = self.lock();
        // 后写入的排在前面，时间相同时保持该顺序
        let mut logs: Vec<AuditLog> = tables
            .audit_logs
            .iter()
            .rev()
            .filter(|log| audit_matches(log, scope, filters))
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        Ok(logs
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count(&self, scope: &TenantScope, filters: &AuditLogFilters) -> Result<i64, AppError> {
        let tables = self.lock();
        Ok(tables
            .audit_logs
            .iter()
            .filter(|log| audit_matches(log, scope, filters))
            .count() as i64)
    }
}

#[async_trait]
impl WebhookRepository for InMemoryStore {
    async fn create(&self, subscription: &WebhookSubscription) -> Result<WebhookSubscription, AppError> {
        self.lock()
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(subscription.clone())
    }

    async fn find(&self, scope: &TenantScope, id: Uuid) -> Result<Option<WebhookSubscription>, AppError> {
        Ok(self
            .lock()
            .subscriptions
            .get(&id)
            .filter(|s| s.tenant_id == scope.tenant_id())
            .cloned())
    }

    async fn list(&self, scope: &TenantScope) -> Result<Vec<WebhookSubscription>, AppError> {
        let tables = self.lock();
        let mut subscriptions: Vec<WebhookSubscription> = tables
            .subscriptions
            .values()
            .filter(|s| s.tenant_id == scope.tenant_id())
            .cloned()
            .collect();
        subscriptions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(subscriptions)
    }

    async fn update(
        &self,
        scope: &TenantScope,
        subscription: &WebhookSubscription,
    ) -> Result<Option<WebhookSubscription>, AppError> {
        let mut tables = self.lock();
        Ok(tables
            .subscriptions
            .get_mut(&subscription.id)
            .filter(|s| s.tenant_id == scope.tenant_id())
            .map(|stored| {
                stored.target_url = subscription.target_url.clone();
                stored.enabled = subscription.enabled;
                stored.updated_at = subscription.updated_at;
                stored.clone()
            }))
    }

    async fn delete(&self, scope: &TenantScope, id: Uuid) -> Result<bool, AppError> {
        let mut tables = self.lock();
        let owned = tables
            .subscriptions
            .get(&id)
            .is_some_and(|s| s.tenant_id == scope.tenant_id());
        if owned {
            tables.subscriptions.remove(&id);
        }
        Ok(owned)
    }

    async fn find_active(
        &self,
        scope: &TenantScope,
        event_name: &str,
    ) -> Result<Vec<WebhookSubscription>, AppError> {
        Ok(self
            .lock()
            .subscriptions
            .values()
            .filter(|s| s.tenant_id == scope.tenant_id() && s.enabled && s.event_name == event_name)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl IntegrationEventRepository for InMemoryStore {
    async fn create(&self, event: &IntegrationEvent) -> Result<IntegrationEvent, AppError> {
        self.lock().events.insert(event.id, event.clone());
        Ok(event.clone())
    }

    async fn find(&self, scope: &TenantScope, id: Uuid) -> Result<Option<IntegrationEvent>, AppError> {
        Ok(self
            .lock()
            .events
            .get(&id)
            .filter(|e| e.tenant_id == scope.tenant_id())
            .cloned())
    }

    async fn list(
        &self,
        scope: &TenantScope,
        status: Option<IntegrationEventStatus>,
        limit: i64,
    ) -> Result<Vec<IntegrationEvent>, AppError> {
        let tables = self.lock();
        let mut events: Vec<IntegrationEvent> = tables
            .events
            .values()
            .filter(|e| e.tenant_id == scope.tenant_id())
            .filter(|e| status.map_or(true, |s| e.status == s))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        events.truncate(limit.max(0) as usize);
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
        let mut tables = self.lock();
        Ok(tables
            .events
            .get_mut(&id)
            .filter(|e| e.tenant_id == scope.tenant_id() && e.status.can_transition_to(status))
            .map(|event| {
                event.status = status;
                event.processed_at = Some(processed_at);
                event.error_message = error_message.map(str::to_string);
                event.clone()
            }))
    }
}

/// 在表的副本上执行全部写入，成功后整体替换，失败时原表不变
#[async_trait]
impl ProvisioningRepository for InMemoryStore {
    async fn provision_tenant(&self, plan: &ProvisioningPlan) -> Result<(Tenant, User), AppError> {
        plan.unrestricted.check_key()?;

        let mut tables = self.lock();
        let mut staged = tables.clone();

        if staged.tenants.values().any(|t| t.slug == plan.tenant.slug) {
            return Err(AppError::conflict("tenant slug already exists"));
        }
        staged.tenants.insert(plan.tenant.id, plan.tenant.clone());

        if staged.users.values().any(|u| u.email == plan.owner.email) {
            return Err(AppError::conflict("user email already exists"));
        }
        let owner = User {
            tenant_id: Some(plan.tenant.id),
            ..plan.owner.clone()
        };
        staged.users.insert(owner.id, owner.clone());

        let permission_id = match staged
            .permissions
            .values()
            .find(|p| p.name == plan.unrestricted.name)
        {
            Some(existing) => existing.id,
            None => {
                staged
                    .permissions
                    .insert(plan.unrestricted.id, plan.unrestricted.clone());
                plan.unrestricted.id
            }
        };

        self.role_write_failure()?;
        let role = Role {
            tenant_id: plan.tenant.id,
            ..plan.admin_role.clone()
        };
        staged.roles.insert(role.id, role.clone());
        staged.role_permissions.entry(role.id).or_default().insert(permission_id);
        staged.user_roles.entry(owner.id).or_default().insert(role.id);

        *tables = staged;
        Ok((plan.tenant.clone(), owner))
    }
}
