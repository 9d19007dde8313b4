//! 审计账本
//!
//! 每次调用写入一条不可变记录。写入失败不会回滚已提交的主操作：
//! 错误按 `alert = true` 记录并计数，再以 [`AuditWriteError`] 返回给调用方。

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

use crate::{
    clock::Clock,
    error::{AppError, Result},
    models::audit::{
        stringify_value, AuditAction, AuditLog, AuditLogPage, AuditLogQuery, Auditable,
        FieldChange, Snapshot,
    },
    repository::AuditRepository,
    tenant::TenantScope,
};

/// 审计写入失败（主操作已提交）
#[derive(Debug, Error)]
#[error("audit write failed for {entity_type}/{entity_id} ({action:?}): {source}")]
pub struct AuditWriteError {
    pub entity_type: String,
    pub entity_id: String,
    pub action: AuditAction,
    #[source]
    pub source: AppError,
}

/// 字段级差异
///
/// 结果包含 after 中的键 k，当且仅当 before 中没有 k 或 before[k] != after[k]。
/// 只出现在 before 中的键不计入。
pub fn compute_changes(before: &Snapshot, after: &Snapshot) -> BTreeMap<String, FieldChange> {
    after
        .fields()
        .filter_map(|(name, new_value)| {
            let old_value = before.get(name);
            if old_value == Some(new_value) {
                return None;
            }
            Some((
                name.to_string(),
                FieldChange {
                    old: old_value.and_then(stringify_value),
                    new: stringify_value(new_value),
                },
            ))
        })
        .collect()
}

pub struct AuditService {
    repo: Arc<dyn AuditRepository>,
    clock: Arc<dyn Clock>,
}

impl AuditService {
    pub fn new(repo: Arc<dyn AuditRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    pub async fn record_create(
        &self,
        scope: &TenantScope,
        entity_type: &str,
        entity_id: &str,
        after: &Snapshot,
        actor_id: Option<Uuid>,
    ) -> std::result::Result<AuditLog, AuditWriteError> {
        self.append(scope, entity_type, entity_id, AuditAction::Create, None, Some(after), None, actor_id)
            .await
    }

    pub async fn record_update(
        &self,
        scope: &TenantScope,
        entity_type: &str,
        entity_id: &str,
        before: &Snapshot,
        after: &Snapshot,
        actor_id: Option<Uuid>,
    ) -> std::result::Result<AuditLog, AuditWriteError> {
        let changes = compute_changes(before, after);
        let changes = serde_json::to_value(&changes).unwrap_or(Value::Null);

        self.append(
            scope,
            entity_type,
            entity_id,
            AuditAction::Update,
            Some(before),
            Some(after),
            Some(changes),
            actor_id,
        )
        .await
    }

    pub async fn record_delete(
        &self,
        scope: &TenantScope,
        entity_type: &str,
        entity_id: &str,
        before: &Snapshot,
        actor_id: Option<Uuid>,
    ) -> std::result::Result<AuditLog, AuditWriteError> {
        self.append(scope, entity_type, entity_id, AuditAction::Delete, Some(before), None, None, actor_id)
            .await
    }

    // 实体版本的便捷方法

    pub async fn created<T: Auditable>(
        &self,
        scope: &TenantScope,
        entity: &T,
        actor_id: Option<Uuid>,
    ) -> std::result::Result<AuditLog, AuditWriteError> {
        self.record_create(scope, T::ENTITY_TYPE, &entity.entity_id(), &entity.snapshot(), actor_id)
            .await
    }

    pub async fn updated<T: Auditable>(
        &self,
        scope: &TenantScope,
        before: &T,
        after: &T,
        actor_id: Option<Uuid>,
    ) -> std::result::Result<AuditLog, AuditWriteError> {
        self.record_update(
            scope,
            T::ENTITY_TYPE,
            &after.entity_id(),
            &before.snapshot(),
            &after.snapshot(),
            actor_id,
        )
        .await
    }

    pub async fn deleted<T: Auditable>(
        &self,
        scope: &TenantScope,
        entity: &T,
        actor_id: Option<Uuid>,
    ) -> std::result::Result<AuditLog, AuditWriteError> {
        self.record_delete(scope, T::ENTITY_TYPE, &entity.entity_id(), &entity.snapshot(), actor_id)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn append(
        &self,
        scope: &TenantScope,
        entity_type: &str,
        entity_id: &str,
        action: AuditAction,
        before: Option<&Snapshot>,
        after: Option<&Snapshot>,
        changes: Option<Value>,
        actor_id: Option<Uuid>,
    ) -> std::result::Result<AuditLog, AuditWriteError> {
        let log = AuditLog {
            id: Uuid::new_v4(),
            tenant_id: scope.tenant_id(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            action,
            changed_by_user_id: actor_id,
            timestamp: self.clock.now(),
            before: before.map(Snapshot::to_json),
            after: after.map(Snapshot::to_json),
            changes,
        };

        match self.repo.insert(&log).await {
            Ok(()) => {
                tracing::debug!(
                    tenant_id = %log.tenant_id,
                    entity_type = %log.entity_type,
                    entity_id = %log.entity_id,
                    action = log.action.as_str(),
                    "Audit log recorded"
                );
                Ok(log)
            }
            Err(source) => {
                tracing::error!(
                    alert = true,
                    tenant_id = %log.tenant_id,
                    entity_type = %log.entity_type,
                    entity_id = %log.entity_id,
                    action = log.action.as_str(),
                    error = %source,
                    "Audit write failed after primary mutation committed"
                );
                metrics::counter!("audit_write_failures_total").increment(1);
                Err(AuditWriteError {
                    entity_type: log.entity_type,
                    entity_id: log.entity_id,
                    action,
                    source,
                })
            }
        }
    }

    /// 查询审计日志（按时间倒序分页）
    pub async fn query(&self, scope: &TenantScope, query: &AuditLogQuery) -> Result<AuditLogPage> {
        query.validate().map_err(AppError::from)?;

        let filters = query.filters();
        let offset = (query.page - 1) * query.page_size;

        let total = self.repo.count(scope, &filters).await?;
        let logs = self.repo.query(scope, &filters, query.page_size, offset).await?;

        Ok(AuditLogPage {
            total,
            page: query.page,
            page_size: query.page_size,
            logs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_changes_only_differing_keys() {
        let before = Snapshot::new().field("a", 1).field("b", "x");
        let after = Snapshot::new().field("a", 1).field("b", "y");

        let changes = compute_changes(&before, &after);
        assert_eq!(changes.len(), 1);
        assert_eq!(
            changes["b"],
            FieldChange {
                old: Some("x".to_string()),
                new: Some("y".to_string())
            }
        );
    }

    #[test]
    fn test_key_absent_from_before_is_changed() {
        let before = Snapshot::new().field("a", 1);
        let after = Snapshot::new().field("a", 1).field("enabled", true);

        let changes = compute_changes(&before, &after);
        assert_eq!(
            changes["enabled"],
            FieldChange {
                old: None,
                new: Some("true".to_string())
            }
        );
    }

    #[test]
    fn test_key_only_in_before_is_ignored() {
        let before = Snapshot::new().field("gone", "x").field("a", 1);
        let after = Snapshot::new().field("a", 2);

        let changes = compute_changes(&before, &after);
        assert!(!changes.contains_key("gone"));
        assert!(changes.contains_key("a"));
    }

    #[test]
    fn test_type_change_with_same_text_counts() {
        let before = Snapshot::new().field("n", "1");
        let after = Snapshot::new().field("n", json!(1));

        let changes = compute_changes(&before, &after);
        assert!(changes.contains_key("n"));
    }
}
