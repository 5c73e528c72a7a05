//! Shadow-index lifecycle state machine.
//!
//! # State diagram
//!
//! ```text
//! PREPARING → BUILDING → BUILT → SWITCHING → ACTIVE → CLEANUP
//!                      ↘ FAILED        ↘ FAILED (rollback)
//!             ↘ CANCELLED
//! ```
//!
//! Every transition goes through [`apply`], which rejects anything not in
//! the diagram. Illegal transitions indicate a controller bug or a racing
//! operator action and must be surfaced, never papered over.

use oms_schemas::ShadowState;

/// Events that drive shadow lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowEvent {
    /// Build artifacts allocated; the indexer starts writing.
    BuildStarted,
    /// The indexer reported completion.
    BuildCompleted,
    /// The switch window opened (lock held).
    SwitchStarted,
    /// Promotion verified; the shadow is now the current index.
    SwitchSucceeded,
    /// Promotion failed and was rolled back.
    SwitchFailed,
    /// Build failed before completion.
    BuildFailed,
    /// Operator or controller cancelled the build.
    BuildCancelled,
    /// Old artifacts scheduled for removal.
    CleanupStarted,
}

/// Returned when an event is not legal in the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: ShadowState,
    pub event: String,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "illegal shadow transition: {} + {}",
            self.from.as_str(),
            self.event
        )
    }
}

impl std::error::Error for TransitionError {}

/// Apply one event; returns the next state.
pub fn apply(state: ShadowState, event: ShadowEvent) -> Result<ShadowState, TransitionError> {
    use ShadowEvent::*;
    use ShadowState::*;

    let next = match (state, event) {
        (Preparing, BuildStarted) => Building,
        (Building, BuildCompleted) => Built,
        (Built, SwitchStarted) => Switching,
        (Switching, SwitchSucceeded) => Active,
        (Switching, SwitchFailed) => Failed,
        (Preparing | Building, BuildFailed) => Failed,
        (Preparing | Building, BuildCancelled) => Cancelled,
        (Active, CleanupStarted) => Cleanup,
        (state, event) => {
            return Err(TransitionError {
                from: state,
                event: format!("{event:?}"),
            })
        }
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ShadowEvent::*;
    use ShadowState::*;

    #[test]
    fn happy_path_reaches_active_then_cleanup() {
        let mut s = Preparing;
        for ev in [BuildStarted, BuildCompleted, SwitchStarted, SwitchSucceeded, CleanupStarted] {
            s = apply(s, ev).unwrap();
        }
        assert_eq!(s, Cleanup);
        assert!(s.is_terminal());
    }

    #[test]
    fn switch_failure_rolls_into_failed() {
        let s = apply(Switching, SwitchFailed).unwrap();
        assert_eq!(s, Failed);
        assert!(s.is_terminal());
    }

    #[test]
    fn cancel_is_only_legal_before_built() {
        assert_eq!(apply(Preparing, BuildCancelled).unwrap(), Cancelled);
        assert_eq!(apply(Building, BuildCancelled).unwrap(), Cancelled);
        assert!(apply(Built, BuildCancelled).is_err());
        assert!(apply(Switching, BuildCancelled).is_err());
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let err = apply(Preparing, SwitchStarted).unwrap_err();
        assert_eq!(err.from, Preparing);
        assert!(apply(Active, BuildStarted).is_err());
        assert!(apply(Failed, BuildStarted).is_err());
    }
}
