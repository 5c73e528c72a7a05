//! Lock model.
//!
//! A lock admits or blocks writes at one of three scopes. The expiry
//! predicate lives here because both the lock manager and the freeze gate
//! must agree on it: an expired lock is ignored by admission decisions even
//! before a sweeper has released it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Scope / type
// ---------------------------------------------------------------------------

/// Granularity of admission control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockScope {
    /// Whole branch.
    Branch,
    /// One resource kind within a branch.
    ResourceType,
    /// A single resource.
    Resource,
}

impl LockScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockScope::Branch => "BRANCH",
            LockScope::ResourceType => "RESOURCE_TYPE",
            LockScope::Resource => "RESOURCE",
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "BRANCH" => Ok(LockScope::Branch),
            "RESOURCE_TYPE" => Ok(LockScope::ResourceType),
            "RESOURCE" => Ok(LockScope::Resource),
            other => Err(format!("invalid lock scope: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockType {
    Indexing,
    Maintenance,
    Manual,
}

impl LockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockType::Indexing => "INDEXING",
            LockType::Maintenance => "MAINTENANCE",
            LockType::Manual => "MANUAL",
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "INDEXING" => Ok(LockType::Indexing),
            "MAINTENANCE" => Ok(LockType::Maintenance),
            "MANUAL" => Ok(LockType::Manual),
            other => Err(format!("invalid lock type: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Lock
// ---------------------------------------------------------------------------

/// A persisted lock row. The store is authoritative; in-process caches are
/// advisory only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lock {
    pub id: Uuid,
    pub branch: String,
    pub scope: LockScope,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub lock_type: LockType,
    pub holder: String,
    pub acquired_at_utc: DateTime<Utc>,
    pub expires_at_utc: DateTime<Utc>,
    pub last_heartbeat_utc: Option<DateTime<Utc>>,
    pub heartbeat_interval_s: Option<i64>,
    pub heartbeat_source: Option<String>,
    pub auto_release: bool,
    /// Holder-published build progress (0..=100), if any. Overrides the
    /// time-interpolated estimate in freeze-gate payloads.
    pub reported_progress_pct: Option<f64>,
}

impl Lock {
    /// Expiry has two independent paths: absolute TTL, and a missed
    /// heartbeat older than `grace_factor · heartbeat_interval_s`.
    ///
    /// A heartbeat-enabled lock that has never heartbeated is measured from
    /// `acquired_at_utc`.
    pub fn is_expired(&self, now: DateTime<Utc>, grace_factor: i64) -> bool {
        if now >= self.expires_at_utc {
            return true;
        }
        if let Some(interval_s) = self.heartbeat_interval_s {
            let last = self.last_heartbeat_utc.unwrap_or(self.acquired_at_utc);
            if now - last > Duration::seconds(grace_factor * interval_s) {
                return true;
            }
        }
        false
    }

    /// Two locks conflict iff their branches match and their scope
    /// intersection is non-empty:
    /// - BRANCH intersects everything on the branch;
    /// - RESOURCE_TYPE intersects same-type locks and any RESOURCE under it;
    /// - RESOURCE intersects only the same `(type, id)` or a covering
    ///   broader lock.
    pub fn conflicts_with(&self, other: &Lock) -> bool {
        if self.branch != other.branch {
            return false;
        }
        scopes_intersect(
            self.scope,
            self.resource_type.as_deref(),
            self.resource_id.as_deref(),
            other.scope,
            other.resource_type.as_deref(),
            other.resource_id.as_deref(),
        )
    }
}

/// Scope-intersection predicate shared by lock rows and admission requests
/// (a write request is checked as if it were a RESOURCE or RESOURCE_TYPE
/// claim).
pub fn scopes_intersect(
    a_scope: LockScope,
    a_type: Option<&str>,
    a_id: Option<&str>,
    b_scope: LockScope,
    b_type: Option<&str>,
    b_id: Option<&str>,
) -> bool {
    use LockScope::*;
    match (a_scope, b_scope) {
        (Branch, _) | (_, Branch) => true,
        (ResourceType, ResourceType) => a_type == b_type,
        (ResourceType, Resource) | (Resource, ResourceType) => a_type == b_type,
        (Resource, Resource) => a_type == b_type && a_id == b_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock(scope: LockScope, rt: Option<&str>, rid: Option<&str>) -> Lock {
        Lock {
            id: Uuid::new_v4(),
            branch: "feature/x".to_string(),
            scope,
            resource_type: rt.map(str::to_string),
            resource_id: rid.map(str::to_string),
            lock_type: LockType::Indexing,
            holder: "indexer".to_string(),
            acquired_at_utc: Utc::now(),
            expires_at_utc: Utc::now() + Duration::minutes(30),
            last_heartbeat_utc: None,
            heartbeat_interval_s: None,
            heartbeat_source: None,
            auto_release: true,
            reported_progress_pct: None,
        }
    }

    #[test]
    fn branch_scope_conflicts_with_everything_on_branch() {
        let b = lock(LockScope::Branch, None, None);
        let rt = lock(LockScope::ResourceType, Some("object_type"), None);
        let r = lock(LockScope::Resource, Some("object_type"), Some("rid-1"));
        assert!(b.conflicts_with(&rt));
        assert!(b.conflicts_with(&r));
        assert!(rt.conflicts_with(&b));
    }

    #[test]
    fn resource_type_scope_is_type_bounded() {
        let ot = lock(LockScope::ResourceType, Some("object_type"), None);
        let lt = lock(LockScope::ResourceType, Some("link_type"), None);
        let under_ot = lock(LockScope::Resource, Some("object_type"), Some("rid-1"));
        let under_lt = lock(LockScope::Resource, Some("link_type"), Some("rid-2"));
        assert!(!ot.conflicts_with(&lt));
        assert!(ot.conflicts_with(&under_ot));
        assert!(!ot.conflicts_with(&under_lt));
    }

    #[test]
    fn resource_scope_requires_same_type_and_id() {
        let a = lock(LockScope::Resource, Some("property"), Some("rid-1"));
        let same = lock(LockScope::Resource, Some("property"), Some("rid-1"));
        let other_id = lock(LockScope::Resource, Some("property"), Some("rid-2"));
        assert!(a.conflicts_with(&same));
        assert!(!a.conflicts_with(&other_id));
    }

    #[test]
    fn different_branches_never_conflict() {
        let a = lock(LockScope::Branch, None, None);
        let mut b = lock(LockScope::Branch, None, None);
        b.branch = "feature/y".to_string();
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn ttl_expiry() {
        let mut l = lock(LockScope::Branch, None, None);
        l.expires_at_utc = Utc::now() - Duration::seconds(1);
        assert!(l.is_expired(Utc::now(), 3));
    }

    #[test]
    fn heartbeat_expiry_uses_grace_factor() {
        let now = Utc::now();
        let mut l = lock(LockScope::Branch, None, None);
        l.heartbeat_interval_s = Some(60);
        l.last_heartbeat_utc = Some(now - Duration::seconds(179));
        assert!(!l.is_expired(now, 3), "within 3x interval");
        l.last_heartbeat_utc = Some(now - Duration::seconds(181));
        assert!(l.is_expired(now, 3), "beyond 3x interval");
    }

    #[test]
    fn heartbeat_expiry_without_any_heartbeat_measures_from_acquire() {
        let now = Utc::now();
        let mut l = lock(LockScope::Branch, None, None);
        l.heartbeat_interval_s = Some(10);
        l.acquired_at_utc = now - Duration::seconds(31);
        assert!(l.is_expired(now, 3));
    }
}
