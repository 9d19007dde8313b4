//! 会话服务

use chrono::Duration;
use std::sync::Arc;

use crate::{
    auth::ApiKeyGenerator,
    clock::Clock,
    config::MAX_SESSION_TTL_SECS,
    error::Result,
    models::user::{User, UserSession},
    repository::SessionRepository,
};
use uuid::Uuid;

pub struct SessionService {
    sessions: Arc<dyn SessionRepository>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SessionService {
    pub fn new(sessions: Arc<dyn SessionRepository>, clock: Arc<dyn Clock>, ttl_secs: u64) -> Self {
        Self {
            sessions,
            clock,
            // 配置加载时已校验上限，这里再收紧一次避免溢出
            ttl: Duration::seconds(ttl_secs.min(MAX_SESSION_TTL_SECS) as i64),
        }
    }

    /// 新建会话，同时删除该用户之前的会话
    pub async fn start(&self, actor: &User) -> Result<UserSession> {
        let replaced = self.sessions.delete_for_user(actor.id).await?;

        let now = self.clock.now();
        let session = UserSession {
            id: Uuid::new_v4(),
            user_id: actor.id,
            session_token: ApiKeyGenerator::session_token(),
            expires_at: now + self.ttl,
            created_at: now,
        };
        let session = self.sessions.create(&session).await?;

        tracing::info!(user_id = %actor.id, replaced, "Session started");

        Ok(session)
    }

    /// 删除用户的全部会话
    pub async fn logout(&self, actor: &User) -> Result<u64> {
        let removed = self.sessions.delete_for_user(actor.id).await?;
        tracing::info!(user_id = %actor.id, removed, "User logged out");
        Ok(removed)
    }
}
