//! Role / group / permission models
//!
//! 权限图只有两层：用户 -> 角色/组 -> 权限，不支持角色嵌套。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::error::AppError;

/// 无限制权限的序列化形式
pub const UNRESTRICTED: &str = "*.*";

/// Permission (全局唯一命名)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Permission {
    pub id: Uuid,
    /// 展示名，全局唯一
    pub name: String,
    pub resource: String,
    pub action: String,
    pub description: Option<String>,
}

impl Permission {
    pub fn is_unrestricted(&self) -> bool {
        self.resource == "*" && self.action == "*"
    }

    /// 授权判断使用的键 `<resource>.<action>`，与展示用的 name 无关
    pub fn key(&self) -> String {
        format!("{}.{}", self.resource, self.action)
    }

    /// resource 含 `.` 或任一段为空时，键无法被唯一拆回
    pub fn check_key(&self) -> Result<(), AppError> {
        let key = self.key();
        match split_permission(&key) {
            Some((resource, action)) if resource == self.resource && action == self.action => Ok(()),
            _ => Err(AppError::validation(format!(
                "permission: resource `{}` and action `{}` do not form a valid key",
                self.resource, self.action
            ))),
        }
    }
}

/// 拆分权限名，只在第一个 `.` 处切分
pub fn split_permission(name: &str) -> Option<(&str, &str)> {
    let (resource, action) = name.split_once('.')?;
    if resource.is_empty() || action.is_empty() {
        return None;
    }
    Some((resource, action))
}

/// Role (租户内命名集合)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Role {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Group (租户内命名集合)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Group {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 有效权限集合，天然去重且有序
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EffectivePermissions(BTreeSet<String>);

impl EffectivePermissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, permission: impl Into<String>) {
        self.0.insert(permission.into());
    }

    pub fn contains(&self, permission: &str) -> bool {
        self.0.contains(permission)
    }

    pub fn is_unrestricted(&self) -> bool {
        self.0.contains(UNRESTRICTED)
    }

    /// `required` 被授予，或集合中含有 `*.*`
    pub fn allows(&self, required: &str) -> bool {
        self.is_unrestricted() || self.contains(required)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn is_subset(&self, other: &EffectivePermissions) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0.into_iter().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for EffectivePermissions {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl Extend<String> for EffectivePermissions {
    fn extend<I: IntoIterator<Item = String>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_permission() {
        assert_eq!(split_permission("contacts.read"), Some(("contacts", "read")));
        assert_eq!(split_permission("*.*"), Some(("*", "*")));
        assert_eq!(split_permission("audit.logs.read"), Some(("audit", "logs.read")));
        assert_eq!(split_permission("contacts"), None);
        assert_eq!(split_permission(".read"), None);
    }

    fn permission(name: &str, resource: &str, action: &str) -> Permission {
        Permission {
            id: Uuid::new_v4(),
            name: name.to_string(),
            resource: resource.to_string(),
            action: action.to_string(),
            description: None,
        }
    }

    #[test]
    fn test_key_ignores_display_name() {
        let read = permission("Read contacts", "contacts", "read");
        assert_eq!(read.key(), "contacts.read");
        assert!(read.check_key().is_ok());
        assert!(permission("*.*", "*", "*").check_key().is_ok());
    }

    #[test]
    fn test_unsplittable_key_rejected() {
        assert!(permission("x", "audit.logs", "read").check_key().is_err());
        assert!(permission("x", "contacts", "").check_key().is_err());
        assert!(permission("x", "", "read").check_key().is_err());
    }

    #[test]
    fn test_unrestricted_allows_anything() {
        let set: EffectivePermissions = ["*.*"].into_iter().collect();
        assert!(set.allows("contacts.delete"));
        assert!(set.allows("never.granted"));
    }

    #[test]
    fn test_empty_set_fails_closed() {
        let set = EffectivePermissions::new();
        assert!(!set.allows("contacts.read"));
    }
}
