//! ChangeSet / proposal model.
//!
//! A changeset groups entity mutations and moves through a review lifecycle
//! before merge. Merged changesets are immutable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{EntityKind, SchemaEntity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSetState {
    Draft,
    Review,
    Approved,
    Merged,
    Rejected,
}

impl ChangeSetState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeSetState::Draft => "draft",
            ChangeSetState::Review => "review",
            ChangeSetState::Approved => "approved",
            ChangeSetState::Merged => "merged",
            ChangeSetState::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "draft" => Ok(ChangeSetState::Draft),
            "review" => Ok(ChangeSetState::Review),
            "approved" => Ok(ChangeSetState::Approved),
            "merged" => Ok(ChangeSetState::Merged),
            "rejected" => Ok(ChangeSetState::Rejected),
            other => Err(format!("invalid changeset state: {other}")),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChangeSetState::Merged | ChangeSetState::Rejected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOp {
    Add,
    Modify,
    Delete,
}

/// One entity mutation inside a changeset. `entity` is `None` for deletes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMutation {
    pub kind: EntityKind,
    pub rid: Uuid,
    pub op: MutationOp,
    pub entity: Option<SchemaEntity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeSet {
    pub id: Uuid,
    pub source_branch: String,
    pub target_branch: String,
    pub state: ChangeSetState,
    /// Common-ancestor commit used as the three-way merge base.
    pub base_commit: String,
    /// The target branch as of changeset creation — the materialized
    /// merge base. Kept with the changeset so the three-way merge never
    /// depends on history that compaction may have collapsed.
    #[serde(default)]
    pub base_snapshot: Vec<SchemaEntity>,
    pub mutations: Vec<EntityMutation>,
    pub created_at_utc: DateTime<Utc>,
    pub created_by: String,
    pub updated_at_utc: DateTime<Utc>,
    pub updated_by: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_terminals() {
        assert!(ChangeSetState::Merged.is_terminal());
        assert!(ChangeSetState::Rejected.is_terminal());
        assert!(!ChangeSetState::Draft.is_terminal());
        assert!(!ChangeSetState::Review.is_terminal());
        assert!(!ChangeSetState::Approved.is_terminal());
    }
}
