//! Branch lock manager.
//!
//! # Invariants
//!
//! - **The store is authoritative.** Lock rows live in Postgres; the
//!   in-process cache is advisory and only feeds status surfaces.
//! - **Admission never trusts expired locks.** Both the TTL path and the
//!   missed-heartbeat path are evaluated at decision time, before any
//!   sweeper has run.
//! - **Acquisition is serialized per branch** through the store's advisory
//!   lock, so two racing acquires cannot both pass the conflict check.
//! - **Every acquire/release/heartbeat/extend writes a `lock_audit` row**
//!   in the same transaction as the lock-row change.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use oms_schemas::Lock;

mod manager;
mod state;
mod sweeper;

pub use manager::{
    infer_resource_types, AcquireRequest, ConflictInfo, ExpiryPath, LockManager, ReleaseReason,
    WriteCheck,
};
pub use state::{branch_transition_on_acquire, branch_transition_on_release, TransitionError};
pub use sweeper::{spawn_heartbeat_sweeper, spawn_ttl_sweeper};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Lock-manager failures callers match on.
#[derive(Debug)]
pub enum LockError {
    /// A live lock with overlapping scope blocks the request.
    Conflict(ConflictInfo),
    /// The lock was already released.
    Gone,
    /// Privileged operation attempted by a non-privileged caller.
    Forbidden,
    /// The store advisory lock could not be acquired within the timeout.
    Timeout,
    Unavailable(String),
    Internal(String),
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::Conflict(info) => write!(
                f,
                "lock conflict: {} lock held by '{}' until {}",
                info.scope.as_str(),
                info.holder,
                info.expires_at_utc
            ),
            LockError::Gone => write!(f, "lock already released"),
            LockError::Forbidden => write!(f, "privileged lock operation refused"),
            LockError::Timeout => write!(f, "advisory lock acquisition timed out"),
            LockError::Unavailable(msg) => write!(f, "lock store unavailable: {msg}"),
            LockError::Internal(msg) => write!(f, "lock manager internal error: {msg}"),
        }
    }
}

impl std::error::Error for LockError {}

impl From<oms_db::StoreError> for LockError {
    fn from(e: oms_db::StoreError) -> Self {
        match e {
            oms_db::StoreError::Timeout => LockError::Timeout,
            oms_db::StoreError::Unavailable(m) => LockError::Unavailable(m),
            other => LockError::Internal(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Advisory cache
// ---------------------------------------------------------------------------

/// Process-wide advisory cache of lock rows, keyed by lock id.
///
/// Explicit `init`/`shutdown` lifecycle: the daemon creates it at boot and
/// drops it at exit; nothing reads it for admission decisions.
#[derive(Clone, Default)]
pub struct LockCache {
    inner: Arc<RwLock<HashMap<Uuid, Lock>>>,
}

impl LockCache {
    pub fn init() -> Self {
        Self::default()
    }

    pub async fn put(&self, lock: Lock) {
        self.inner.write().await.insert(lock.id, lock);
    }

    pub async fn remove(&self, id: Uuid) {
        self.inner.write().await.remove(&id);
    }

    /// Snapshot of cached locks, expired entries dropped.
    pub async fn snapshot(&self, grace_factor: i64) -> Vec<Lock> {
        let now = Utc::now();
        self.inner
            .read()
            .await
            .values()
            .filter(|l| !l.is_expired(now, grace_factor))
            .cloned()
            .collect()
    }

    pub async fn shutdown(&self) {
        self.inner.write().await.clear();
    }
}
