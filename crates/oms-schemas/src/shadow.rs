//! Shadow index model.
//!
//! At most one non-terminal shadow exists per `(branch, index_type)`; the
//! controller in `oms-shadow` owns the transitions, this module owns the
//! vocabulary and the terminal predicate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShadowState {
    Preparing,
    Building,
    Built,
    Switching,
    Active,
    Failed,
    Cancelled,
    Cleanup,
}

impl ShadowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShadowState::Preparing => "PREPARING",
            ShadowState::Building => "BUILDING",
            ShadowState::Built => "BUILT",
            ShadowState::Switching => "SWITCHING",
            ShadowState::Active => "ACTIVE",
            ShadowState::Failed => "FAILED",
            ShadowState::Cancelled => "CANCELLED",
            ShadowState::Cleanup => "CLEANUP",
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "PREPARING" => Ok(ShadowState::Preparing),
            "BUILDING" => Ok(ShadowState::Building),
            "BUILT" => Ok(ShadowState::Built),
            "SWITCHING" => Ok(ShadowState::Switching),
            "ACTIVE" => Ok(ShadowState::Active),
            "FAILED" => Ok(ShadowState::Failed),
            "CANCELLED" => Ok(ShadowState::Cancelled),
            "CLEANUP" => Ok(ShadowState::Cleanup),
            other => Err(format!("invalid shadow state: {other}")),
        }
    }

    /// Terminal states release the `(branch, index_type)` slot.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ShadowState::Active | ShadowState::Failed | ShadowState::Cancelled | ShadowState::Cleanup
        )
    }
}

/// How the atomic switch promotes the shadow artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwitchStrategy {
    /// Filesystem rename; bounded regardless of artifact size on
    /// POSIX-like stores. Default.
    AtomicRename,
    /// Copy then replace; slower, recoverable, required for cross-volume
    /// moves.
    CopyAndReplace,
}

/// Persisted shadow-index row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowIndex {
    pub id: Uuid,
    pub branch: String,
    pub index_type: String,
    pub resource_types: Vec<String>,
    pub state: ShadowState,
    pub progress_pct: f64,
    pub estimated_completion_s: Option<i64>,
    pub record_count: Option<i64>,
    pub size_bytes: Option<i64>,
    pub build_started_at_utc: DateTime<Utc>,
    pub build_completed_at_utc: Option<DateTime<Utc>>,
    pub current_path: Option<String>,
    pub shadow_path: String,
}
