//! Authenticator 实现
//!
//! 核心只依赖 [`Authenticator`]，具体使用哪一种由 `security.authenticator` 决定。
//! 凭证无效、缺失、过期，用户不存在或已停用，一律返回认证错误。

use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    auth::jwt::JwtService,
    clock::Clock,
    error::{AppError, Result},
    models::user::User,
    repository::{SessionRepository, UserRepository},
};

/// 请求携带的凭证
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Bearer(String),
    SessionCookie(String),
}

impl Credential {
    pub fn token(&self) -> &str {
        match self {
            Credential::Bearer(token) | Credential::SessionCookie(token) => token,
        }
    }
}

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credential: &Credential) -> Result<User>;
}

fn require_active(user: Option<User>) -> Result<User> {
    match user {
        Some(user) if user.is_active => Ok(user),
        Some(user) => {
            tracing::warn!(user_id = %user.id, "Inactive user attempted to authenticate");
            Err(AppError::authentication("user is inactive"))
        }
        None => Err(AppError::authentication("unknown user")),
    }
}

/// 不透明会话令牌
pub struct SessionAuthenticator {
    sessions: Arc<dyn SessionRepository>,
    users: Arc<dyn UserRepository>,
    clock: Arc<dyn Clock>,
}

impl SessionAuthenticator {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        users: Arc<dyn UserRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions,
            users,
            clock,
        }
    }
}

#[async_trait]
impl Authenticator for SessionAuthenticator {
    async fn authenticate(&self, credential: &Credential) -> Result<User> {
        let session = self
            .sessions
            .find_by_token(credential.token())
            .await?
            .ok_or_else(|| AppError::authentication("invalid session"))?;

        // 过期会话留在表里，登出或下次登录时删除
        if session.is_expired(self.clock.now()) {
            tracing::debug!(user_id = %session.user_id, "Session expired");
            return Err(AppError::authentication("session expired"));
        }

        require_active(self.users.find_by_id(session.user_id).await?)
    }
}

/// HS256 JWT
pub struct JwtAuthenticator {
    jwt: Arc<JwtService>,
    users: Arc<dyn UserRepository>,
}

impl JwtAuthenticator {
    pub fn new(jwt: Arc<JwtService>, users: Arc<dyn UserRepository>) -> Self {
        Self { jwt, users }
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn authenticate(&self, credential: &Credential) -> Result<User> {
        let claims = self.jwt.validate_token(credential.token())?;
        let user = require_active(self.users.find_by_id(claims.sub).await?)?;

        // 令牌签发后用户换了租户，旧令牌作废
        if claims.tenant_id != user.tenant_id {
            return Err(AppError::authentication("token tenant mismatch"));
        }
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        models::user::UserSession,
        repository::InMemoryStore,
    };
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn user(active: bool) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            tenant_id: Some(Uuid::new_v4()),
            email: format!("{}@example.com", Uuid::new_v4()),
            name: "Agent".to_string(),
            picture: None,
            is_active: active,
            tier: None,
            created_at: now,
            updated_at: now,
        }
    }

    async fn setup(active: bool) -> (Arc<InMemoryStore>, Arc<ManualClock>, SessionAuthenticator, User) {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let user = user(active);
        store.insert_user(user.clone());

        let session = UserSession {
            id: Uuid::new_v4(),
            user_id: user.id,
            session_token: "token-1".to_string(),
            expires_at: clock.now() + Duration::hours(1),
            created_at: clock.now(),
        };
        SessionRepository::create(store.as_ref(), &session).await.unwrap();

        let authenticator = SessionAuthenticator::new(store.clone(), store.clone(), clock.clone());
        (store, clock, authenticator, user)
    }

    #[tokio::test]
    async fn test_valid_session() {
        let (_store, _clock, authenticator, user) = setup(true).await;
        let actor = authenticator
            .authenticate(&Credential::SessionCookie("token-1".to_string()))
            .await
            .unwrap();
        assert_eq!(actor.id, user.id);
    }

    #[tokio::test]
    async fn test_expired_session_rejected() {
        let (store, clock, authenticator, _user) = setup(true).await;
        clock.advance(Duration::hours(2));

        let err = authenticator
            .authenticate(&Credential::Bearer("token-1".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Authentication(_)));
        // 不主动清理
        assert!(store.find_by_token("token-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unknown_token_and_inactive_user() {
        let (_store, _clock, authenticator, _user) = setup(false).await;

        let err = authenticator
            .authenticate(&Credential::Bearer("nope".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), 401);

        let err = authenticator
            .authenticate(&Credential::Bearer("token-1".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), 401);
    }
}
