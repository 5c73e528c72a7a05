//! Audit record model.
//!
//! Rows are append-only; nothing in the system updates an audit record after
//! insertion. PII-tagged fields are masked or encrypted by `oms-audit`
//! before the record reaches persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Before/after snapshot of a mutated target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditChanges {
    pub before: Option<Value>,
    pub after: Option<Value>,
    #[serde(default)]
    pub fields_changed: Vec<String>,
}

/// One append-only audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event_id: Uuid,
    pub action: String,
    pub actor_id: String,
    pub actor_roles: Vec<String>,
    pub target_kind: String,
    pub target_id: String,
    pub branch: Option<String>,
    pub success: bool,
    pub error_code: Option<String>,
    pub duration_ms: i64,
    #[serde(default)]
    pub changes: AuditChanges,
    pub metadata: Value,
    pub time_utc: DateTime<Utc>,
}
