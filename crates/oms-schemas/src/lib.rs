//! Shared DTOs for the ontology management core.
//!
//! Every other crate depends on these types; this crate depends only on
//! serde/uuid/chrono and contains no IO. Status-like enums follow the
//! `as_str` / `parse` convention so DB rows and wire payloads stay in sync
//! with a single source of truth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod audit;
pub mod changeset;
pub mod entity;
pub mod events;
pub mod lock;
pub mod shadow;

pub use audit::{AuditChanges, AuditRecord};
pub use changeset::{ChangeSet, ChangeSetState, EntityMutation, MutationOp};
pub use entity::{
    ActionTypeSpec, BaseType, Cardinality, EntityHeader, EntityKind, EntityStatus,
    InterfaceProperty, InterfaceSpec, LinkTypeSpec, ObjectTypeSpec, PropertyConstraints,
    PropertySpec, SchemaEntity, Visibility,
};
pub use events::{subjects, EventEnvelope, OutboxRecord, OutboxStatus};
pub use lock::{scopes_intersect, Lock, LockScope, LockType};
pub use shadow::{ShadowIndex, ShadowState, SwitchStrategy};

// ---------------------------------------------------------------------------
// Branch
// ---------------------------------------------------------------------------

/// Lifecycle state of a branch.
///
/// Transitions are owned by the lock manager (see `oms-locks`); this enum is
/// only the vocabulary. `Error` is sticky until a privileged force-unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BranchState {
    Active,
    LockedForWrite,
    Ready,
    Archived,
    Error,
}

impl BranchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BranchState::Active => "ACTIVE",
            BranchState::LockedForWrite => "LOCKED_FOR_WRITE",
            BranchState::Ready => "READY",
            BranchState::Archived => "ARCHIVED",
            BranchState::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "ACTIVE" => Ok(BranchState::Active),
            "LOCKED_FOR_WRITE" => Ok(BranchState::LockedForWrite),
            "READY" => Ok(BranchState::Ready),
            "ARCHIVED" => Ok(BranchState::Archived),
            "ERROR" => Ok(BranchState::Error),
            other => Err(format!("invalid branch state: {other}")),
        }
    }

    /// Branches accept merges only while ACTIVE or READY.
    pub fn accepts_merge(&self) -> bool {
        matches!(self, BranchState::Active | BranchState::Ready)
    }
}

/// A named, versioned workspace for ontology changes.
///
/// `version` increments on every persisted mutation and is the optimistic
/// concurrency token for branch-level writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub state: BranchState,
    pub head_commit: Option<String>,
    pub updated_at_utc: DateTime<Utc>,
    pub updated_by: String,
    pub version: i64,
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Error kinds surfaced across component boundaries.
///
/// The HTTP mapping lives in `oms-daemon`; components only speak kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidArgument,
    Unauthenticated,
    Forbidden,
    NotFound,
    Conflict,
    Locked,
    PreconditionFailed,
    Timeout,
    Unavailable,
    Exhausted,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::Unauthenticated => "UNAUTHENTICATED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Locked => "LOCKED",
            ErrorKind::PreconditionFailed => "PRECONDITION_FAILED",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Unavailable => "UNAVAILABLE",
            ErrorKind::Exhausted => "EXHAUSTED",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    /// Transient kinds are retryable by the caller with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Unavailable | ErrorKind::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_state_round_trips() {
        for s in [
            BranchState::Active,
            BranchState::LockedForWrite,
            BranchState::Ready,
            BranchState::Archived,
            BranchState::Error,
        ] {
            assert_eq!(BranchState::parse(s.as_str()).unwrap(), s);
        }
        assert!(BranchState::parse("bogus").is_err());
    }

    #[test]
    fn merge_admission_by_state() {
        assert!(BranchState::Active.accepts_merge());
        assert!(BranchState::Ready.accepts_merge());
        assert!(!BranchState::LockedForWrite.accepts_merge());
        assert!(!BranchState::Archived.accepts_merge());
        assert!(!BranchState::Error.accepts_merge());
    }

    #[test]
    fn transient_kinds() {
        assert!(ErrorKind::Unavailable.is_transient());
        assert!(ErrorKind::Timeout.is_transient());
        assert!(!ErrorKind::Conflict.is_transient());
    }
}
