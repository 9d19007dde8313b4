//! User & session repository (用户与会话数据访问)

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::unique_violation;
use crate::{
    error::AppError,
    models::user::{User, UserSession},
};

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// email 全局唯一，重复返回 Conflict
    async fn create(&self, user: &User) -> Result<User, AppError>;

    /// 不带租户范围，仅供认证器按凭证解析用户
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: &UserSession) -> Result<UserSession, AppError>;

    async fn find_by_token(&self, token: &str) -> Result<Option<UserSession>, AppError>;

    /// 删除用户的全部会话，返回删除条数
    async fn delete_for_user(&self, user_id: Uuid) -> Result<u64, AppError>;
}

pub struct PgUserRepository {
    db: PgPool,
}

impl PgUserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: &User) -> Result<User, AppError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, tenant_id, email, name, picture, is_active, tier, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(user.id)
        .bind(user.tenant_id)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.picture)
        .bind(user.is_active)
        .bind(user.tier)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&self.db)
        .await
        .map_err(|e| unique_violation(e, "user email"))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.db)
            .await?;

        Ok(user)
    }
}

pub struct PgSessionRepository {
    db: PgPool,
}

impl PgSessionRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn create(&self, session: &UserSession) -> Result<UserSession, AppError> {
        let session = sqlx::query_as::<_, UserSession>(
            r#"
            INSERT INTO user_sessions (id, user_id, session_token, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(&session.session_token)
        .bind(session.expires_at)
        .bind(session.created_at)
        .fetch_one(&self.db)
        .await?;

        Ok(session)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<UserSession>, AppError> {
        let session =
            sqlx::query_as::<_, UserSession>("SELECT * FROM user_sessions WHERE session_token = $1")
                .bind(token)
                .fetch_optional(&self.db)
                .await?;

        Ok(session)
    }

    async fn delete_for_user(&self, user_id: Uuid) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM user_sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }
}
