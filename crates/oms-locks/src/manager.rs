//! The lock manager proper.
//!
//! Acquisition path: pre-check against live locks (so `timeout = 0` can
//! refuse without touching the advisory lock), then a transaction holding
//! the branch advisory lock re-checks, inserts the row, writes the audit
//! entry, emits the `lock.acquired` event, and applies any branch state
//! transition — all atomically.

use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use oms_config::LockConfig;
use oms_db::{outbox::NewOutboxEvent, NewLockAudit, StoreError};
use oms_schemas::{
    scopes_intersect, subjects, BranchState, EntityKind, EventEnvelope, Lock, LockScope, LockType,
};

use crate::{
    state::{branch_transition_on_acquire, branch_transition_on_release},
    LockCache, LockError,
};

pub const EVENT_SOURCE: &str = "/oms/locks";

// ---------------------------------------------------------------------------
// Requests / results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AcquireRequest {
    pub branch: String,
    pub scope: LockScope,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub lock_type: LockType,
    pub holder: String,
    /// Maximum wait for the store advisory lock. Zero means refuse
    /// immediately on any conflict.
    pub timeout: Duration,
    /// Absolute lifetime of the lock.
    pub ttl_s: i64,
    pub heartbeat_interval_s: Option<i64>,
}

/// Details of the blocking lock, surfaced inside `LockError::Conflict` and
/// reused by the freeze gate's 423 payload.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConflictInfo {
    pub lock_id: Uuid,
    pub scope: LockScope,
    pub lock_type: LockType,
    pub holder: String,
    pub resource_type: Option<String>,
    pub acquired_at_utc: chrono::DateTime<Utc>,
    pub expires_at_utc: chrono::DateTime<Utc>,
    pub reported_progress_pct: Option<f64>,
}

impl From<&Lock> for ConflictInfo {
    fn from(l: &Lock) -> Self {
        Self {
            lock_id: l.id,
            scope: l.scope,
            lock_type: l.lock_type,
            holder: l.holder.clone(),
            resource_type: l.resource_type.clone(),
            acquired_at_utc: l.acquired_at_utc,
            expires_at_utc: l.expires_at_utc,
            reported_progress_pct: l.reported_progress_pct,
        }
    }
}

/// Result of an admission check.
#[derive(Debug, Clone)]
pub struct WriteCheck {
    pub allowed: bool,
    pub conflicting: Option<ConflictInfo>,
    /// Resource types currently covered by live locks on the branch.
    pub locked_resource_types: Vec<String>,
    /// True when a BRANCH-scoped lock freezes everything.
    pub branch_locked: bool,
}

/// Why a lock was released; recorded in `lock_audit` and on the
/// `lock.released` / `lock.expired` events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseReason {
    Completed,
    TtlExpired,
    HeartbeatMissed,
    ForceUnlock,
    Cancelled,
}

impl ReleaseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseReason::Completed => "COMPLETED",
            ReleaseReason::TtlExpired => "TTL_EXPIRED",
            ReleaseReason::HeartbeatMissed => "HEARTBEAT_MISSED",
            ReleaseReason::ForceUnlock => "FORCE_UNLOCK",
            ReleaseReason::Cancelled => "CANCELLED",
        }
    }

    fn is_expiry(&self) -> bool {
        matches!(self, ReleaseReason::TtlExpired | ReleaseReason::HeartbeatMissed)
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct LockManager {
    pool: PgPool,
    cfg: LockConfig,
    cache: LockCache,
}

impl LockManager {
    pub fn new(pool: PgPool, cfg: LockConfig) -> Self {
        Self {
            pool,
            cfg,
            cache: LockCache::init(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &LockConfig {
        &self.cfg
    }

    pub fn cache(&self) -> &LockCache {
        &self.cache
    }

    /// Live (non-expired) locks on a branch, straight from the store.
    pub async fn live_locks(&self, branch: &str) -> Result<Vec<Lock>, LockError> {
        let now = Utc::now();
        let grace = self.cfg.heartbeat_grace_factor;
        Ok(oms_db::locks_active_for_branch(&self.pool, branch)
            .await?
            .into_iter()
            .filter(|l| !l.is_expired(now, grace))
            .collect())
    }

    // -----------------------------------------------------------------------
    // Acquire
    // -----------------------------------------------------------------------

    pub async fn acquire_lock(&self, req: AcquireRequest) -> Result<Lock, LockError> {
        let locks = self.acquire_many(vec![req]).await?;
        locks
            .into_iter()
            .next()
            .ok_or_else(|| LockError::Internal("acquire batch returned no lock".to_string()))
    }

    /// Acquire a set of locks on one branch atomically: either every
    /// candidate is granted or none is.
    async fn acquire_many(&self, reqs: Vec<AcquireRequest>) -> Result<Vec<Lock>, LockError> {
        let first = reqs
            .first()
            .ok_or_else(|| LockError::Internal("empty acquire batch".to_string()))?;
        let branch = first.branch.clone();
        let timeout = first.timeout;

        let now = Utc::now();
        let candidates: Vec<Lock> = reqs
            .iter()
            .map(|r| Lock {
                id: Uuid::new_v4(),
                branch: r.branch.clone(),
                scope: r.scope,
                resource_type: r.resource_type.clone(),
                resource_id: r.resource_id.clone(),
                lock_type: r.lock_type,
                holder: r.holder.clone(),
                acquired_at_utc: now,
                expires_at_utc: now + chrono::Duration::seconds(r.ttl_s),
                last_heartbeat_utc: None,
                heartbeat_interval_s: r.heartbeat_interval_s,
                heartbeat_source: None,
                auto_release: true,
                reported_progress_pct: None,
            })
            .collect();

        // Fast refusal without touching the advisory lock, so timeout = 0
        // behaves as an immediate CONFLICT check.
        let live = self.live_locks(&branch).await?;
        if let Some(conflict) = first_conflict(&candidates, &live) {
            return Err(LockError::Conflict(conflict));
        }

        let branch_row = oms_db::branch_get(&self.pool, &branch)
            .await
            .map_err(store_to_lock_err)?;

        let mut tx = oms_db::begin(&self.pool).await?;
        oms_db::advisory_lock(&mut tx, branch_advisory_key(&branch).as_bytes(), timeout).await?;

        // Re-check under the advisory lock: a racing acquire may have
        // committed between the fast check and here.
        let live = oms_db::locks_active_for_branch(&self.pool, &branch)
            .await?
            .into_iter()
            .filter(|l| !l.is_expired(Utc::now(), self.cfg.heartbeat_grace_factor))
            .collect::<Vec<_>>();
        if let Some(conflict) = first_conflict(&candidates, &live) {
            return Err(LockError::Conflict(conflict));
        }

        let mut state = branch_row.state;
        for lock in &candidates {
            oms_db::lock_insert(&mut tx, lock).await?;
            oms_db::lock_audit_insert(
                &mut tx,
                &NewLockAudit {
                    lock_id: lock.id,
                    branch: &lock.branch,
                    scope: lock.scope,
                    resource_type: lock.resource_type.as_deref(),
                    resource_id: lock.resource_id.as_deref(),
                    holder: &lock.holder,
                    action: "acquired",
                    metadata: json!({
                        "lock_type": lock.lock_type.as_str(),
                        "ttl_s": (lock.expires_at_utc - lock.acquired_at_utc).num_seconds(),
                        "heartbeat_interval_s": lock.heartbeat_interval_s,
                    }),
                },
            )
            .await?;
            emit_lock_event(&mut tx, subjects::LOCK_ACQUIRED, lock, None).await?;

            state = branch_transition_on_acquire(state, lock.scope)
                .map_err(|e| LockError::Internal(e.to_string()))?;
        }

        if state != branch_row.state {
            oms_db::branch_set_state(&mut tx, &branch, state, branch_row.version, "lock-manager")
                .await
                .map_err(store_to_lock_err)?;
        }

        tx.commit().await.map_err(|e| LockError::Unavailable(e.to_string()))?;

        for lock in &candidates {
            info!(
                lock_id = %lock.id,
                branch = %lock.branch,
                scope = lock.scope.as_str(),
                holder = %lock.holder,
                "lock acquired"
            );
            self.cache.put(lock.clone()).await;
        }

        Ok(candidates)
    }

    // -----------------------------------------------------------------------
    // Release
    // -----------------------------------------------------------------------

    pub async fn release_lock(&self, lock_id: Uuid, reason: ReleaseReason) -> Result<Lock, LockError> {
        let mut tx = oms_db::begin(&self.pool).await?;

        let Some(lock) = oms_db::lock_delete(&mut tx, lock_id).await? else {
            return Err(LockError::Gone);
        };

        oms_db::lock_audit_insert(
            &mut tx,
            &NewLockAudit {
                lock_id: lock.id,
                branch: &lock.branch,
                scope: lock.scope,
                resource_type: lock.resource_type.as_deref(),
                resource_id: lock.resource_id.as_deref(),
                holder: &lock.holder,
                action: if reason.is_expiry() { "expired" } else { "released" },
                metadata: json!({ "reason": reason.as_str() }),
            },
        )
        .await?;

        let subject = if reason.is_expiry() {
            subjects::LOCK_EXPIRED
        } else {
            subjects::LOCK_RELEASED
        };
        emit_lock_event(&mut tx, subject, &lock, Some(reason.as_str())).await?;

        self.settle_branch_after_release(&mut tx, &lock.branch, lock.id).await?;

        tx.commit().await.map_err(|e| LockError::Unavailable(e.to_string()))?;
        self.cache.remove(lock_id).await;

        info!(
            lock_id = %lock_id,
            branch = %lock.branch,
            reason = reason.as_str(),
            "lock released"
        );
        Ok(lock)
    }

    /// After any release inside `tx`: if the branch was frozen and no live
    /// lock remains, move LOCKED_FOR_WRITE → READY.
    async fn settle_branch_after_release(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        branch: &str,
        released_id: Uuid,
    ) -> Result<(), LockError> {
        let branch_row = match oms_db::branch_get(&self.pool, branch).await {
            Ok(b) => b,
            Err(StoreError::NotFound { .. }) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        // The pool read happens before this transaction commits, so the
        // row deleted above may still be visible; exclude it by id.
        let remaining = self
            .live_locks(branch)
            .await?
            .iter()
            .filter(|l| l.id != released_id)
            .count();
        let next = branch_transition_on_release(branch_row.state, remaining);
        if next != branch_row.state {
            oms_db::branch_set_state(tx, branch, next, branch_row.version, "lock-manager")
                .await
                .map_err(store_to_lock_err)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Indexing convenience surface
    // -----------------------------------------------------------------------

    /// Take the minimal locks an index build needs.
    ///
    /// Default scope is RESOURCE_TYPE over `resource_types` (inferred from
    /// the branch name when omitted; `object_type` when inference fails).
    /// `force_branch_lock` takes one BRANCH lock instead.
    pub async fn lock_for_indexing(
        &self,
        branch: &str,
        resource_types: Option<Vec<String>>,
        force_branch_lock: bool,
        holder: &str,
    ) -> Result<Vec<Lock>, LockError> {
        let ttl_s = self.cfg.default_timeout_s.max(60) * 30;
        let timeout = Duration::from_secs(self.cfg.default_timeout_s.max(1) as u64);

        let reqs = if force_branch_lock {
            vec![AcquireRequest {
                branch: branch.to_string(),
                scope: LockScope::Branch,
                resource_type: None,
                resource_id: None,
                lock_type: LockType::Indexing,
                holder: holder.to_string(),
                timeout,
                ttl_s,
                heartbeat_interval_s: Some(60),
            }]
        } else {
            let types = resource_types.unwrap_or_else(|| infer_resource_types(branch));
            types
                .into_iter()
                .map(|t| AcquireRequest {
                    branch: branch.to_string(),
                    scope: LockScope::ResourceType,
                    resource_type: Some(t),
                    resource_id: None,
                    lock_type: LockType::Indexing,
                    holder: holder.to_string(),
                    timeout,
                    ttl_s,
                    heartbeat_interval_s: Some(60),
                })
                .collect()
        };

        self.acquire_many(reqs).await
    }

    /// Release indexing locks for the listed resource types (all indexing
    /// locks when `None`). Remaining locks stay held and the branch keeps
    /// its current state until the last one goes.
    pub async fn complete_indexing(
        &self,
        branch: &str,
        resource_types: Option<Vec<String>>,
    ) -> Result<usize, LockError> {
        let live = self.live_locks(branch).await?;
        let to_release: Vec<Uuid> = live
            .iter()
            .filter(|l| l.lock_type == LockType::Indexing)
            .filter(|l| match (&resource_types, &l.resource_type) {
                (None, _) => true,
                (Some(types), Some(rt)) => types.contains(rt),
                // Branch-scoped indexing locks release on full completion only.
                (Some(_), None) => false,
            })
            .map(|l| l.id)
            .collect();

        let mut released = 0;
        for id in to_release {
            match self.release_lock(id, ReleaseReason::Completed).await {
                Ok(_) => released += 1,
                Err(LockError::Gone) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(released)
    }

    // -----------------------------------------------------------------------
    // Heartbeat / extend
    // -----------------------------------------------------------------------

    pub async fn heartbeat(
        &self,
        lock_id: Uuid,
        source: &str,
        progress_pct: Option<f64>,
    ) -> Result<Lock, LockError> {
        let mut tx = oms_db::begin(&self.pool).await?;
        let now = Utc::now();
        let Some(lock) =
            oms_db::lock_heartbeat_update(&mut tx, lock_id, source, progress_pct, now).await?
        else {
            return Err(LockError::Gone);
        };

        oms_db::lock_audit_insert(
            &mut tx,
            &NewLockAudit {
                lock_id: lock.id,
                branch: &lock.branch,
                scope: lock.scope,
                resource_type: lock.resource_type.as_deref(),
                resource_id: lock.resource_id.as_deref(),
                holder: &lock.holder,
                action: "heartbeat",
                metadata: json!({ "source": source, "progress_pct": progress_pct }),
            },
        )
        .await?;

        tx.commit().await.map_err(|e| LockError::Unavailable(e.to_string()))?;
        self.cache.put(lock.clone()).await;
        Ok(lock)
    }

    pub async fn extend_ttl(
        &self,
        lock_id: Uuid,
        extension_s: i64,
        reason: &str,
    ) -> Result<Lock, LockError> {
        if extension_s <= 0 {
            return Err(LockError::Internal(format!(
                "extension_s must be positive, got {extension_s}"
            )));
        }

        let mut tx = oms_db::begin(&self.pool).await?;
        let Some(lock) = oms_db::lock_extend(&mut tx, lock_id, extension_s).await? else {
            return Err(LockError::Gone);
        };

        oms_db::lock_audit_insert(
            &mut tx,
            &NewLockAudit {
                lock_id: lock.id,
                branch: &lock.branch,
                scope: lock.scope,
                resource_type: lock.resource_type.as_deref(),
                resource_id: lock.resource_id.as_deref(),
                holder: &lock.holder,
                action: "extended",
                metadata: json!({ "extension_s": extension_s, "reason": reason }),
            },
        )
        .await?;

        tx.commit().await.map_err(|e| LockError::Unavailable(e.to_string()))?;
        self.cache.put(lock.clone()).await;
        Ok(lock)
    }

    // -----------------------------------------------------------------------
    // Admission
    // -----------------------------------------------------------------------

    /// Decide whether a write at `(branch, resource_type?, resource_id?)`
    /// may proceed. Expired locks are ignored here even before a sweeper
    /// has released them.
    pub async fn check_write_permission(
        &self,
        branch: &str,
        _action: &str,
        resource_type: Option<&str>,
        resource_id: Option<&str>,
    ) -> Result<WriteCheck, LockError> {
        let live = self.live_locks(branch).await?;

        let req_scope = match (resource_type, resource_id) {
            (Some(_), Some(_)) => LockScope::Resource,
            (Some(_), None) => LockScope::ResourceType,
            _ => LockScope::Branch,
        };

        let conflicting = live.iter().find(|l| {
            scopes_intersect(
                l.scope,
                l.resource_type.as_deref(),
                l.resource_id.as_deref(),
                req_scope,
                resource_type,
                resource_id,
            )
        });

        let branch_locked = live.iter().any(|l| l.scope == LockScope::Branch);
        let mut locked_resource_types: Vec<String> = if branch_locked {
            EntityKind::ALL.iter().map(|k| k.as_str().to_string()).collect()
        } else {
            live.iter().filter_map(|l| l.resource_type.clone()).collect()
        };
        locked_resource_types.sort();
        locked_resource_types.dedup();

        Ok(WriteCheck {
            allowed: conflicting.is_none(),
            conflicting: conflicting.map(ConflictInfo::from),
            locked_resource_types,
            branch_locked,
        })
    }

    // -----------------------------------------------------------------------
    // Privileged operations
    // -----------------------------------------------------------------------

    /// Drop every lock on a branch and return it to ACTIVE. Requires a
    /// privileged caller; the permission check happens upstream, this
    /// method only enforces the flag.
    pub async fn force_unlock(
        &self,
        branch: &str,
        reason: &str,
        actor: &str,
        privileged: bool,
    ) -> Result<usize, LockError> {
        if !privileged {
            return Err(LockError::Forbidden);
        }

        let locks = oms_db::locks_active_for_branch(&self.pool, branch).await?;

        let mut tx = oms_db::begin(&self.pool).await?;
        let timeout = Duration::from_secs(self.cfg.default_timeout_s.max(1) as u64);
        oms_db::advisory_lock(&mut tx, branch_advisory_key(branch).as_bytes(), timeout).await?;

        let mut dropped = 0;
        for lock in &locks {
            if oms_db::lock_delete(&mut tx, lock.id).await?.is_some() {
                oms_db::lock_audit_insert(
                    &mut tx,
                    &NewLockAudit {
                        lock_id: lock.id,
                        branch: &lock.branch,
                        scope: lock.scope,
                        resource_type: lock.resource_type.as_deref(),
                        resource_id: lock.resource_id.as_deref(),
                        holder: &lock.holder,
                        action: "force_unlocked",
                        metadata: json!({ "reason": reason, "actor": actor }),
                    },
                )
                .await?;
                emit_lock_event(&mut tx, subjects::LOCK_RELEASED, lock, Some("FORCE_UNLOCK"))
                    .await?;
                dropped += 1;
            }
        }

        match oms_db::branch_get(&self.pool, branch).await {
            Ok(b) if b.state != BranchState::Active => {
                oms_db::branch_set_state(&mut tx, branch, BranchState::Active, b.version, actor)
                    .await
                    .map_err(store_to_lock_err)?;
            }
            Ok(_) => {}
            Err(StoreError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        tx.commit().await.map_err(|e| LockError::Unavailable(e.to_string()))?;

        for lock in &locks {
            self.cache.remove(lock.id).await;
        }
        warn!(branch = %branch, actor = %actor, dropped, "force unlock");
        Ok(dropped)
    }

    /// Record an indexing failure: the branch goes to ERROR (sticky until
    /// force-unlock).
    pub async fn mark_branch_error(&self, branch: &str, reason: &str) -> Result<(), LockError> {
        let b = oms_db::branch_get(&self.pool, branch).await.map_err(store_to_lock_err)?;
        if b.state == BranchState::Error {
            return Ok(());
        }
        let mut tx = oms_db::begin(&self.pool).await?;
        oms_db::branch_set_state(&mut tx, branch, BranchState::Error, b.version, "lock-manager")
            .await
            .map_err(store_to_lock_err)?;
        tx.commit().await.map_err(|e| LockError::Unavailable(e.to_string()))?;
        warn!(branch = %branch, reason = %reason, "branch marked ERROR");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Sweeping
    // -----------------------------------------------------------------------

    /// Release every lock expired via the given path. Returns the released
    /// locks. Called by the background sweepers; safe to call ad hoc.
    pub async fn sweep_expired(&self, path: ExpiryPath) -> Result<Vec<Lock>, LockError> {
        let now = Utc::now();
        let grace = self.cfg.heartbeat_grace_factor;
        let all = oms_db::locks_all(&self.pool).await?;

        let mut released = Vec::new();
        for lock in all {
            let hit = match path {
                ExpiryPath::Ttl => now >= lock.expires_at_utc,
                ExpiryPath::Heartbeat => {
                    now < lock.expires_at_utc && lock.is_expired(now, grace)
                }
            };
            if !hit || !lock.auto_release {
                continue;
            }
            let reason = match path {
                ExpiryPath::Ttl => ReleaseReason::TtlExpired,
                ExpiryPath::Heartbeat => ReleaseReason::HeartbeatMissed,
            };
            match self.release_lock(lock.id, reason).await {
                Ok(l) => released.push(l),
                Err(LockError::Gone) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(released)
    }
}

/// Which expiry path a sweeper services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryPath {
    Ttl,
    Heartbeat,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn branch_advisory_key(branch: &str) -> String {
    format!("branch:{branch}")
}

fn first_conflict(candidates: &[Lock], live: &[Lock]) -> Option<ConflictInfo> {
    for cand in candidates {
        if let Some(l) = live.iter().find(|l| l.conflicts_with(cand)) {
            return Some(ConflictInfo::from(l));
        }
    }
    None
}

fn store_to_lock_err(e: StoreError) -> LockError {
    match e {
        StoreError::NotFound { what } => LockError::Internal(format!("missing {what}")),
        StoreError::Conflict { detail, .. } => {
            LockError::Unavailable(format!("branch row contention: {detail}"))
        }
        other => other.into(),
    }
}

async fn emit_lock_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    subject: &str,
    lock: &Lock,
    reason: Option<&str>,
) -> Result<(), LockError> {
    let envelope = EventEnvelope::new(
        format!("com.oms.{subject}"),
        EVENT_SOURCE,
        subject,
        json!({
            "lock_id": lock.id,
            "branch": lock.branch,
            "scope": lock.scope.as_str(),
            "resource_type": lock.resource_type,
            "resource_id": lock.resource_id,
            "lock_type": lock.lock_type.as_str(),
            "holder": lock.holder,
            "expires_at": lock.expires_at_utc,
            "reason": reason,
        }),
        lock.branch.clone(),
        lock.holder.clone(),
    );
    let data = serde_json::to_value(&envelope)
        .map_err(|e| LockError::Internal(format!("lock event encode: {e}")))?;

    oms_db::outbox_insert(
        tx,
        &NewOutboxEvent {
            event_id: envelope.id,
            event_type: envelope.event_type.clone(),
            subject: subject.to_string(),
            correlation_id: envelope.ce_correlationid,
            idempotency_key: None,
            data,
            max_retries: 3,
        },
    )
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Resource-type inference
// ---------------------------------------------------------------------------

/// Guess which resource types an index build for `branch` touches from the
/// branch name. Falls back to `object_type` when nothing matches.
pub fn infer_resource_types(branch: &str) -> Vec<String> {
    let lower = branch.to_ascii_lowercase();
    let mut out = Vec::new();
    if lower.contains("interface") {
        out.push("interface".to_string());
    }
    if lower.contains("link") {
        out.push("link_type".to_string());
    }
    if lower.contains("action") {
        out.push("action_type".to_string());
    }
    if lower.contains("prop") {
        out.push("property".to_string());
    }
    if out.is_empty() {
        out.push("object_type".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inference_matches_branch_name_fragments() {
        assert_eq!(infer_resource_types("feature/link-cleanup"), vec!["link_type"]);
        assert_eq!(infer_resource_types("fix/action-perms"), vec!["action_type"]);
        assert_eq!(
            infer_resource_types("feature/prop-and-link"),
            vec!["link_type", "property"]
        );
        assert_eq!(infer_resource_types("feature/x"), vec!["object_type"]);
    }

    #[test]
    fn release_reason_strings() {
        assert_eq!(ReleaseReason::TtlExpired.as_str(), "TTL_EXPIRED");
        assert_eq!(ReleaseReason::HeartbeatMissed.as_str(), "HEARTBEAT_MISSED");
        assert!(ReleaseReason::TtlExpired.is_expiry());
        assert!(!ReleaseReason::Completed.is_expiry());
    }
}
