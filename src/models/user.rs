//! User (actor) and session models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// 静态等级，仅在 static_tier 授权模式下生效
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "static_tier", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StaticTier {
    Admin,
    Manager,
    Agent,
    Viewer,
}

impl StaticTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            StaticTier::Admin => "admin",
            StaticTier::Manager => "manager",
            StaticTier::Agent => "agent",
            StaticTier::Viewer => "viewer",
        }
    }
}

impl Default for StaticTier {
    fn default() -> Self {
        StaticTier::Agent
    }
}

impl FromStr for StaticTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(StaticTier::Admin),
            "manager" => Ok(StaticTier::Manager),
            "agent" => Ok(StaticTier::Agent),
            "viewer" => Ok(StaticTier::Viewer),
            other => Err(format!("unknown tier: {}", other)),
        }
    }
}

/// User account (actor)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    /// 租户开通前为空
    pub tenant_id: Option<Uuid>,
    pub email: String,
    pub name: String,
    pub picture: Option<String>,
    pub is_active: bool,
    pub tier: Option<StaticTier>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 登录会话
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserSession {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing)]
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl UserSession {
    /// 过期会话不会被主动清理，只在读取时判定无效
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// `/auth/me` 响应
#[derive(Debug, Serialize)]
pub struct CurrentUserResponse {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub email: String,
    pub name: String,
    pub picture: Option<String>,
    pub is_active: bool,
    pub tier: Option<StaticTier>,
    pub roles: Vec<String>,
    pub groups: Vec<String>,
    pub permissions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tier_is_agent() {
        assert_eq!(StaticTier::default(), StaticTier::Agent);
    }

    #[test]
    fn test_static_tier_from_str() {
        assert_eq!("ADMIN".parse::<StaticTier>().unwrap(), StaticTier::Admin);
        assert_eq!("viewer".parse::<StaticTier>().unwrap(), StaticTier::Viewer);
        assert!("owner".parse::<StaticTier>().is_err());
    }

    #[test]
    fn test_session_expiry_boundary() {
        let now = Utc::now();
        let session = UserSession {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            session_token: "t".to_string(),
            expires_at: now,
            created_at: now,
        };
        assert!(session.is_expired(now));
        assert!(!session.is_expired(now - chrono::Duration::seconds(1)));
    }
}
