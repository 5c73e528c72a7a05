//! Branch state transitions owned by the lock manager.
//!
//! ```text
//! ACTIVE  ──branch-lock acquired──▶ LOCKED_FOR_WRITE
//! ACTIVE  ──resource-lock only──▶  ACTIVE (unchanged)
//! LOCKED_FOR_WRITE ──all locks released──▶ READY
//! READY   ──merge/commit──▶ ACTIVE
//! any     ──indexing failure──▶ ERROR
//! ERROR   ──force_unlock──▶ ACTIVE
//! ```
//!
//! All logic here is pure; the manager applies the result inside its
//! transaction.

use oms_schemas::{BranchState, LockScope};

/// Returned when a transition is not legal from the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: BranchState,
    pub event: String,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "illegal branch transition: {} + {}",
            self.from.as_str(),
            self.event
        )
    }
}

impl std::error::Error for TransitionError {}

/// State after acquiring a lock of `scope`.
///
/// Resource-scoped locks leave the branch ACTIVE so unrelated writes keep
/// flowing; only a BRANCH-scoped lock freezes the whole branch.
pub fn branch_transition_on_acquire(
    current: BranchState,
    scope: LockScope,
) -> Result<BranchState, TransitionError> {
    match (current, scope) {
        (BranchState::Active, LockScope::Branch) => Ok(BranchState::LockedForWrite),
        (BranchState::Active, _) => Ok(BranchState::Active),
        // READY branches (all locks released, merge pending) accept new
        // indexing rounds the same way ACTIVE ones do.
        (BranchState::Ready, LockScope::Branch) => Ok(BranchState::LockedForWrite),
        (BranchState::Ready, _) => Ok(BranchState::Ready),
        // A second lock while frozen keeps the branch frozen.
        (BranchState::LockedForWrite, _) => Ok(BranchState::LockedForWrite),
        (from, scope) => Err(TransitionError {
            from,
            event: format!("acquire {}", scope.as_str()),
        }),
    }
}

/// State after releasing locks. `remaining` counts live (non-expired)
/// locks still held on the branch after the release.
pub fn branch_transition_on_release(current: BranchState, remaining: usize) -> BranchState {
    match current {
        BranchState::LockedForWrite if remaining == 0 => BranchState::Ready,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_lock_freezes_active_branch() {
        assert_eq!(
            branch_transition_on_acquire(BranchState::Active, LockScope::Branch).unwrap(),
            BranchState::LockedForWrite
        );
    }

    #[test]
    fn resource_lock_leaves_branch_active() {
        for scope in [LockScope::ResourceType, LockScope::Resource] {
            assert_eq!(
                branch_transition_on_acquire(BranchState::Active, scope).unwrap(),
                BranchState::Active
            );
        }
    }

    #[test]
    fn acquire_on_archived_branch_is_illegal() {
        let err =
            branch_transition_on_acquire(BranchState::Archived, LockScope::Branch).unwrap_err();
        assert_eq!(err.from, BranchState::Archived);
        assert!(branch_transition_on_acquire(BranchState::Error, LockScope::Branch).is_err());
    }

    #[test]
    fn ready_branch_accepts_a_new_indexing_round() {
        assert_eq!(
            branch_transition_on_acquire(BranchState::Ready, LockScope::ResourceType).unwrap(),
            BranchState::Ready
        );
        assert_eq!(
            branch_transition_on_acquire(BranchState::Ready, LockScope::Branch).unwrap(),
            BranchState::LockedForWrite
        );
    }

    #[test]
    fn last_release_moves_frozen_branch_to_ready() {
        assert_eq!(
            branch_transition_on_release(BranchState::LockedForWrite, 0),
            BranchState::Ready
        );
        assert_eq!(
            branch_transition_on_release(BranchState::LockedForWrite, 2),
            BranchState::LockedForWrite
        );
        assert_eq!(
            branch_transition_on_release(BranchState::Active, 0),
            BranchState::Active
        );
    }
}
