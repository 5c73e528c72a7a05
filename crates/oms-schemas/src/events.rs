//! Event envelope and outbox record types.
//!
//! The envelope is CloudEvents 1.0 with the extension fields carried as
//! `ce_*` members; serde renames keep the wire shape bit-exact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Subjects
// ---------------------------------------------------------------------------

/// Well-known event subjects. Entity CRUD subjects are derived
/// (`{kind}.{verb}`); these constants cover the fixed ones.
pub mod subjects {
    pub const SCHEMA_CREATED: &str = "schema.created";
    pub const SCHEMA_UPDATED: &str = "schema.updated";
    pub const SCHEMA_DELETED: &str = "schema.deleted";
    pub const BRANCH_CREATED: &str = "branch.created";
    pub const BRANCH_MERGED: &str = "branch.merged";
    pub const INDEXING_STARTED: &str = "indexing.started";
    pub const INDEXING_COMPLETED: &str = "indexing.completed";
    pub const INDEXING_FAILED: &str = "indexing.failed";
    pub const LOCK_ACQUIRED: &str = "lock.acquired";
    pub const LOCK_RELEASED: &str = "lock.released";
    pub const LOCK_EXPIRED: &str = "lock.expired";
    pub const AUDIT_ACTIVITY: &str = "audit.activity.v1";

    /// `{kind}.{verb}`, e.g. `objecttype.created`, `property.updated`.
    pub fn entity(kind: &str, verb: &str) -> String {
        format!("{}.{verb}", kind.replace('_', ""))
    }
}

// ---------------------------------------------------------------------------
// CloudEvents envelope
// ---------------------------------------------------------------------------

/// CloudEvents 1.0 envelope with the OMS extension attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub specversion: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub id: Uuid,
    pub time: DateTime<Utc>,
    pub datacontenttype: String,
    pub subject: String,
    pub data: Value,
    pub ce_correlationid: Uuid,
    pub ce_causationid: Option<Uuid>,
    pub ce_branch: String,
    pub ce_commit: Option<String>,
    pub ce_author: String,
    pub ce_tenant: Option<String>,
}

impl EventEnvelope {
    pub const SPECVERSION: &'static str = "1.0";
    pub const CONTENT_TYPE: &'static str = "application/json";

    /// Build an envelope with a fresh id, current time, and a fresh
    /// correlation id. Callers chaining causally copy `ce_correlationid`
    /// from the triggering event and set `ce_causationid` to its id.
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        subject: impl Into<String>,
        data: Value,
        branch: impl Into<String>,
        author: impl Into<String>,
    ) -> Self {
        Self {
            specversion: Self::SPECVERSION.to_string(),
            event_type: event_type.into(),
            source: source.into(),
            id: Uuid::new_v4(),
            time: Utc::now(),
            datacontenttype: Self::CONTENT_TYPE.to_string(),
            subject: subject.into(),
            data,
            ce_correlationid: Uuid::new_v4(),
            ce_causationid: None,
            ce_branch: branch.into(),
            ce_commit: None,
            ce_author: author.into(),
            ce_tenant: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Published,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processing => "processing",
            OutboxStatus::Published => "published",
            OutboxStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "processing" => Ok(OutboxStatus::Processing),
            "published" => Ok(OutboxStatus::Published),
            "failed" => Ok(OutboxStatus::Failed),
            other => Err(format!("invalid outbox status: {other}")),
        }
    }
}

/// One transactional outbox row. Inserted in the same transaction as the
/// business change; the dispatcher claims it with an optimistic
/// `pending → processing` update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxRecord {
    pub id: i64,
    pub event_id: Uuid,
    pub event_type: String,
    /// Full serialized [`EventEnvelope`].
    pub payload: Value,
    pub subject: String,
    pub correlation_id: Uuid,
    pub idempotency_key: Option<String>,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry_at_utc: Option<DateTime<Utc>>,
    pub created_at_utc: DateTime<Utc>,
    pub published_at_utc: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_wire_shape_is_bit_exact() {
        let env = EventEnvelope {
            specversion: EventEnvelope::SPECVERSION.to_string(),
            event_type: "com.oms.schema.created".to_string(),
            source: "/oms/core".to_string(),
            id: Uuid::new_v4(),
            time: Utc::now(),
            datacontenttype: EventEnvelope::CONTENT_TYPE.to_string(),
            subject: subjects::SCHEMA_CREATED.to_string(),
            data: json!({"api_name": "User"}),
            ce_correlationid: Uuid::new_v4(),
            ce_causationid: None,
            ce_branch: "main".to_string(),
            ce_commit: Some("abc123".to_string()),
            ce_author: "alice".to_string(),
            ce_tenant: None,
        };
        let v = serde_json::to_value(&env).unwrap();
        // Required CloudEvents members.
        assert_eq!(v["specversion"], "1.0");
        assert!(v.get("type").is_some(), "tag must serialize as `type`");
        assert!(v.get("event_type").is_none());
        assert_eq!(v["datacontenttype"], "application/json");
        // Extension members keep their ce_ prefix.
        assert_eq!(v["ce_branch"], "main");
        assert_eq!(v["ce_author"], "alice");
    }

    #[test]
    fn entity_subject_strips_underscores() {
        assert_eq!(subjects::entity("object_type", "created"), "objecttype.created");
        assert_eq!(subjects::entity("link_type", "deleted"), "linktype.deleted");
        assert_eq!(subjects::entity("property", "updated"), "property.updated");
    }

    #[test]
    fn outbox_status_round_trips() {
        for s in [
            OutboxStatus::Pending,
            OutboxStatus::Processing,
            OutboxStatus::Published,
            OutboxStatus::Failed,
        ] {
            assert_eq!(OutboxStatus::parse(s.as_str()).unwrap(), s);
        }
    }
}
