//! Schema-freeze gate.
//!
//! Pre-write admission: extract `(branch, resource_type?, resource_id?)`
//! from the request, ask the lock manager, and either let the write
//! proceed or produce the structured `SchemaFrozen` rejection the client
//! can act on (progress, ETA, which resource types remain writable).
//!
//! The payload math is pure and unit-tested here; the HTTP 423 mapping
//! lives in the daemon.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use oms_locks::{ConflictInfo, LockError, LockManager};
use oms_schemas::EntityKind;

/// Progress interpolation is capped below 100 so a stale lock never claims
/// a finished build it cannot prove.
const INTERPOLATED_PROGRESS_CAP: f64 = 95.0;

// ---------------------------------------------------------------------------
// Rejection payload
// ---------------------------------------------------------------------------

/// The 423 payload contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaFrozenResponse {
    pub error: String,
    pub message: String,
    pub lock_scope: String,
    pub other_resources_available: bool,
    pub available_resource_types: Vec<String>,
    /// 0..=100, integer percent.
    pub indexing_progress: u8,
    pub eta_seconds: i64,
    pub alternative_actions: Vec<String>,
}

/// Outcome of an admission check.
#[derive(Debug, Clone)]
pub enum Admission {
    Proceed,
    Frozen(SchemaFrozenResponse),
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Proceed)
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct FreezeGate {
    locks: LockManager,
}

impl FreezeGate {
    pub fn new(locks: LockManager) -> Self {
        Self { locks }
    }

    /// Admission check for one write request.
    pub async fn admit(
        &self,
        branch: &str,
        action: &str,
        resource_type: Option<&str>,
        resource_id: Option<&str>,
    ) -> Result<Admission, LockError> {
        let check = self
            .locks
            .check_write_permission(branch, action, resource_type, resource_id)
            .await?;

        let Some(conflict) = check.conflicting else {
            return Ok(Admission::Proceed);
        };
        let payload = frozen_payload(&conflict, &check.locked_resource_types, Utc::now());
        debug!(
            branch = %branch,
            action = %action,
            holder = %conflict.holder,
            progress = payload.indexing_progress,
            "write rejected by schema freeze"
        );
        Ok(Admission::Frozen(payload))
    }
}

// ---------------------------------------------------------------------------
// Payload derivation (pure)
// ---------------------------------------------------------------------------

/// Build the rejection payload from the blocking lock.
pub fn frozen_payload(
    conflict: &ConflictInfo,
    locked_resource_types: &[String],
    now: DateTime<Utc>,
) -> SchemaFrozenResponse {
    let progress = indexing_progress(conflict, now);
    let eta = eta_seconds(conflict, now);

    let available: Vec<String> = EntityKind::ALL
        .iter()
        .map(|k| k.as_str().to_string())
        .filter(|k| !locked_resource_types.contains(k))
        .collect();

    let mut alternative_actions = vec!["wait_and_retry".to_string()];
    if !available.is_empty() {
        alternative_actions.push(format!("edit_other_resource_types: {}", available.join(", ")));
    }
    alternative_actions.push("contact_lock_holder".to_string());

    let message = match &conflict.resource_type {
        Some(rt) => format!(
            "{rt} writes on this branch are frozen while '{}' finishes (~{eta}s remaining)",
            conflict.holder
        ),
        None => format!(
            "the branch is frozen while '{}' finishes (~{eta}s remaining)",
            conflict.holder
        ),
    };

    SchemaFrozenResponse {
        error: "SchemaFrozen".to_string(),
        message,
        lock_scope: conflict.scope.as_str().to_string(),
        other_resources_available: !available.is_empty(),
        available_resource_types: available,
        indexing_progress: progress,
        eta_seconds: eta,
        alternative_actions,
    }
}

/// Progress percent for the payload.
///
/// Holder-published progress wins; otherwise interpolate elapsed time over
/// the lock window, clamped to `[0, 95]`.
pub fn indexing_progress(conflict: &ConflictInfo, now: DateTime<Utc>) -> u8 {
    if let Some(p) = conflict.reported_progress_pct {
        return p.clamp(0.0, 100.0).round() as u8;
    }

    let window = (conflict.expires_at_utc - conflict.acquired_at_utc).num_seconds();
    if window <= 0 {
        return 0;
    }
    let elapsed = (now - conflict.acquired_at_utc).num_seconds().max(0);
    let pct = (elapsed as f64 / window as f64) * 100.0;
    pct.clamp(0.0, INTERPOLATED_PROGRESS_CAP).round() as u8
}

/// `expires_at − now`, clamped to ≥ 0.
pub fn eta_seconds(conflict: &ConflictInfo, now: DateTime<Utc>) -> i64 {
    (conflict.expires_at_utc - now).num_seconds().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use oms_schemas::{LockScope, LockType};
    use uuid::Uuid;

    fn conflict(
        acquired_s_ago: i64,
        expires_in_s: i64,
        reported: Option<f64>,
        resource_type: Option<&str>,
    ) -> ConflictInfo {
        let now = Utc::now();
        ConflictInfo {
            lock_id: Uuid::new_v4(),
            scope: match resource_type {
                Some(_) => LockScope::ResourceType,
                None => LockScope::Branch,
            },
            lock_type: LockType::Indexing,
            holder: "indexer-1".to_string(),
            resource_type: resource_type.map(str::to_string),
            acquired_at_utc: now - Duration::seconds(acquired_s_ago),
            expires_at_utc: now + Duration::seconds(expires_in_s),
            reported_progress_pct: reported,
        }
    }

    #[test]
    fn interpolated_progress_is_capped_at_95() {
        // 99% of the window elapsed.
        let c = conflict(990, 10, None, Some("object_type"));
        assert_eq!(indexing_progress(&c, Utc::now()), 95);
    }

    #[test]
    fn reported_progress_overrides_interpolation() {
        let c = conflict(990, 10, Some(42.4), Some("object_type"));
        assert_eq!(indexing_progress(&c, Utc::now()), 42);
        // Reported progress may exceed the interpolation cap.
        let c = conflict(10, 990, Some(99.9), Some("object_type"));
        assert_eq!(indexing_progress(&c, Utc::now()), 100);
    }

    #[test]
    fn eta_clamps_to_zero_for_overdue_locks() {
        let c = conflict(100, -5, None, None);
        assert_eq!(eta_seconds(&c, Utc::now()), 0);
    }

    #[test]
    fn payload_lists_remaining_resource_types() {
        let c = conflict(30, 270, None, Some("object_type"));
        let locked = vec!["object_type".to_string()];
        let p = frozen_payload(&c, &locked, Utc::now());

        assert_eq!(p.error, "SchemaFrozen");
        assert_eq!(p.lock_scope, "RESOURCE_TYPE");
        assert!(p.other_resources_available);
        assert!(p.available_resource_types.contains(&"link_type".to_string()));
        assert!(p.available_resource_types.contains(&"action_type".to_string()));
        assert!(!p.available_resource_types.contains(&"object_type".to_string()));
        assert!(p.eta_seconds > 0 && p.eta_seconds <= 270);
    }

    #[test]
    fn branch_lock_leaves_nothing_available() {
        let c = conflict(30, 270, None, None);
        let locked: Vec<String> = EntityKind::ALL.iter().map(|k| k.as_str().to_string()).collect();
        let p = frozen_payload(&c, &locked, Utc::now());

        assert!(!p.other_resources_available);
        assert!(p.available_resource_types.is_empty());
        assert_eq!(p.lock_scope, "BRANCH");
    }
}
