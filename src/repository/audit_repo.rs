//! Audit repository (审计数据访问)
//!
//! 只有插入和查询，没有 UPDATE/DELETE。

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::{
    error::AppError,
    models::audit::{AuditLog, AuditLogFilters},
    tenant::TenantScope,
};

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn insert(&self, log: &AuditLog) -> Result<(), AppError>;

    /// 按时间倒序
    async fn query(
        &self,
        scope: &TenantScope,
        filters: &AuditLogFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditLog>, AppError>;

    async fn count(&self, scope: &TenantScope, filters: &AuditLogFilters) -> Result<i64, AppError>;
}

pub struct PgAuditRepository {
    db: PgPool,
}

impl PgAuditRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// 拼接过滤条件，$1 固定为 tenant_id；返回下一个占位符序号
    fn where_clause(query: &mut String, filters: &AuditLogFilters) -> usize {
        let mut index = 1;

        if filters.entity_type.is_some() {
            index += 1;
            query.push_str(&format!(" AND entity_type = ${}", index));
        }
        if filters.entity_id.is_some() {
            index += 1;
            query.push_str(&format!(" AND entity_id = ${}", index));
        }
        if filters.action.is_some() {
            index += 1;
            query.push_str(&format!(" AND action = ${}", index));
        }

        index + 1
    }
}

#[async_trait]
impl AuditRepository for PgAuditRepository {
    async fn insert(&self, log: &AuditLog) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, tenant_id, entity_type, entity_id, action, changed_by_user_id,
                timestamp, before, after, changes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(log.id)
        .bind(log.tenant_id)
        .bind(&log.entity_type)
        .bind(&log.entity_id)
        .bind(log.action)
        .bind(log.changed_by_user_id)
        .bind(log.timestamp)
        .bind(&log.before)
        .bind(&log.after)
        .bind(&log.changes)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn query(
        &self,
        scope: &TenantScope,
        filters: &AuditLogFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditLog>, AppError> {
        let mut query = String::from("SELECT * FROM audit_logs WHERE tenant_id = $1");
        let next = Self::where_clause(&mut query, filters);
        query.push_str(&format!(
            " ORDER BY timestamp DESC LIMIT ${} OFFSET ${}",
            next,
            next + 1
        ));

        let mut query_builder = sqlx::query_as::<_, AuditLog>(&query).bind(scope.tenant_id());

        if let Some(entity_type) = &filters.entity_type {
            query_builder = query_builder.bind(entity_type);
        }
        if let Some(entity_id) = &filters.entity_id {
            query_builder = query_builder.bind(entity_id);
        }
        if let Some(action) = filters.action {
            query_builder = query_builder.bind(action);
        }

        let logs = query_builder
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.db)
            .await?;

        Ok(logs)
    }

    async fn count(&self, scope: &TenantScope, filters: &AuditLogFilters) -> Result<i64, AppError> {
        let mut query = String::from("SELECT COUNT(*) FROM audit_logs WHERE tenant_id = $1");
        Self::where_clause(&mut query, filters);

        let mut query_builder = sqlx::query(&query).bind(scope.tenant_id());

        if let Some(entity_type) = &filters.entity_type {
            query_builder = query_builder.bind(entity_type);
        }
        if let Some(entity_id) = &filters.entity_id {
            query_builder = query_builder.bind(entity_id);
        }
        if let Some(action) = filters.action {
            query_builder = query_builder.bind(action);
        }

        let count: i64 = query_builder.fetch_one(&self.db).await?.get(0);
        Ok(count)
    }
}
