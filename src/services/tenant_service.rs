//! 租户开通与 API key 轮换

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    auth::{ApiKeyGenerator, VerifiedIdentity},
    clock::Clock,
    error::{AppError, Result},
    models::{
        role::{Permission, Role, UNRESTRICTED},
        tenant::Tenant,
        user::{StaticTier, User},
    },
    repository::{ProvisioningPlan, ProvisioningRepository, TenantRepository, UserRepository},
    tenant::TenantScope,
};

static NON_SLUG_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("valid slug regex"));

const SLUG_ATTEMPTS: usize = 5;

/// 由邮箱本地部分生成 slug：小写，非 `[a-z0-9]` 的连续字符替换为 `-`，去掉首尾 `-`
pub fn slugify(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default().to_lowercase();
    let slug = NON_SLUG_CHARS.replace_all(&local, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "tenant".to_string()
    } else {
        slug.to_string()
    }
}

pub struct TenantService {
    tenants: Arc<dyn TenantRepository>,
    users: Arc<dyn UserRepository>,
    provisioning: Arc<dyn ProvisioningRepository>,
    clock: Arc<dyn Clock>,
}

impl TenantService {
    pub fn new(
        tenants: Arc<dyn TenantRepository>,
        users: Arc<dyn UserRepository>,
        provisioning: Arc<dyn ProvisioningRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tenants,
            users,
            provisioning,
            clock,
        }
    }

    async fn available_slug(&self, email: &str) -> Result<String> {
        let base = slugify(email);
        if !self.tenants.slug_exists(&base).await? {
            return Ok(base);
        }

        for _ in 0..SLUG_ATTEMPTS {
            let candidate = format!("{}-{}", base, ApiKeyGenerator::short_suffix());
            if !self.tenants.slug_exists(&candidate).await? {
                return Ok(candidate);
            }
        }

        Err(AppError::conflict("could not allocate a unique tenant slug"))
    }

    /// 首次登录开通：租户 + 所有者 + `*.*` 权限 + Admin 角色，一次性写入
    pub async fn provision(
        &self,
        owner_email: &str,
        owner_name: &str,
        picture: Option<String>,
    ) -> Result<(Tenant, User)> {
        let email = owner_email.trim();
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
            _ => return Err(AppError::validation("email: must be a valid email address")),
        }
        let name = owner_name.trim();
        if name.is_empty() {
            return Err(AppError::validation("name: must not be empty"));
        }

        // 快速失败；并发开通由唯一索引兜底，整次写入回滚
        if self.users.find_by_email(email).await?.is_some() {
            return Err(AppError::conflict("user email already exists"));
        }

        let now = self.clock.now();
        let tenant_id = Uuid::new_v4();
        let plan = ProvisioningPlan {
            tenant: Tenant {
                id: tenant_id,
                name: format!("{}'s Organization", name),
                slug: self.available_slug(email).await?,
                webhook_api_key: ApiKeyGenerator::generate(),
                is_active: true,
                created_at: now,
                updated_at: now,
            },
            owner: User {
                id: Uuid::new_v4(),
                tenant_id: Some(tenant_id),
                email: email.to_string(),
                name: name.to_string(),
                picture,
                is_active: true,
                tier: Some(StaticTier::Admin),
                created_at: now,
                updated_at: now,
            },
            unrestricted: Permission {
                id: Uuid::new_v4(),
                name: UNRESTRICTED.to_string(),
                resource: "*".to_string(),
                action: "*".to_string(),
                description: Some("All permissions".to_string()),
            },
            admin_role: Role {
                id: Uuid::new_v4(),
                tenant_id,
                name: "Admin".to_string(),
                description: Some("Full access administrator".to_string()),
                created_at: now,
            },
        };

        let (tenant, owner) = self.provisioning.provision_tenant(&plan).await?;

        tracing::info!(
            tenant_id = %tenant.id,
            slug = %tenant.slug,
            owner_id = %owner.id,
            "Tenant provisioned"
        );

        Ok((tenant, owner))
    }

    /// 登录：已有用户直接返回，否则开通新租户。第二个值表示是否刚开通
    pub async fn sign_in(&self, identity: &VerifiedIdentity) -> Result<(User, bool)> {
        let email = identity.email.trim();
        if let Some(user) = self.users.find_by_email(email).await? {
            return Ok((user, false));
        }

        match self
            .provision(email, &identity.name, identity.picture.clone())
            .await
        {
            Ok((_, owner)) => Ok((owner, true)),
            // 同一邮箱并发首次登录，另一个请求已完成开通
            Err(AppError::Conflict(_)) => self
                .users
                .find_by_email(email)
                .await?
                .map(|user| (user, false))
                .ok_or_else(|| AppError::conflict("user email already exists")),
            Err(e) => Err(e),
        }
    }

    /// 替换入站 API key 并返回新值
    pub async fn rotate_api_key(&self, scope: &TenantScope) -> Result<String> {
        let api_key = ApiKeyGenerator::generate();

        self.tenants
            .update_api_key(scope.tenant_id(), &api_key)
            .await?
            .ok_or_else(|| AppError::not_found("tenant"))?;

        tracing::info!(
            tenant_id = %scope.tenant_id(),
            key_fingerprint = %ApiKeyGenerator::fingerprint(&api_key),
            "Inbound API key rotated"
        );

        Ok(api_key)
    }
}
