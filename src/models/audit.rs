//! Audit log models
//!
//! 审计记录一经写入不再修改；快照是按实体显式列出的有序字段表。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;
use validator::Validate;

/// 审计动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "audit_action", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
        }
    }
}

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLog {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub action: AuditAction,
    /// 用户删除后置空，不级联删除审计记录
    pub changed_by_user_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub changes: Option<Value>,
}

/// 单个字段的变更，值以字符串形式保存
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: Option<String>,
    pub new: Option<String>,
}

/// 字段值字符串化：字符串保持原样，null 为空，其余用 JSON 文本
pub fn stringify_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// 实体快照
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    fields: Vec<(String, Value)>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加字段；同名字段覆盖原值，保持首次出现的位置
    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name.to_string(), value)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// 字段顺序与追加顺序一致
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Value::Object(map)
    }
}

/// 可审计实体
pub trait Auditable {
    /// 审计记录中的实体类型名
    const ENTITY_TYPE: &'static str;

    fn entity_id(&self) -> String;

    fn snapshot(&self) -> Snapshot;
}

/// Audit log query filters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditLogFilters {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub action: Option<AuditAction>,
}

/// Audit log query parameters (HTTP)
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AuditLogQuery {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub action: Option<AuditAction>,
    #[validate(range(min = 1, message = "page must be >= 1"))]
    #[serde(default = "default_page")]
    pub page: i64,
    #[validate(range(min = 1, max = 100, message = "page_size must be between 1 and 100"))]
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    50
}

impl AuditLogQuery {
    pub fn filters(&self) -> AuditLogFilters {
        AuditLogFilters {
            entity_type: self.entity_type.clone(),
            entity_id: self.entity_id.clone(),
            action: self.action,
        }
    }
}

/// 分页结果
#[derive(Debug, Serialize)]
pub struct AuditLogPage {
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub logs: Vec<AuditLog>,
}
