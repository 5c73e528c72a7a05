//! Merge vocabulary: change classification, conflict severity, results.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use oms_schemas::SchemaEntity;

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Conflict severity. Ordering matters: resolution is automatic at
/// `Info`/`Warn` (with `auto_resolve`), manual at `Error`/`Block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warn,
    Error,
    Block,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Block => "BLOCK",
        }
    }

    /// `true` when the rule table may resolve this conflict without a human.
    pub fn auto_resolvable(&self) -> bool {
        *self <= Severity::Warn
    }
}

// ---------------------------------------------------------------------------
// Changes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Add,
    Modify,
    Delete,
}

/// One side's change to an entity, relative to the merge base.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub kind: ChangeKind,
    /// The entity after the change; `None` for deletes.
    pub entity: Option<SchemaEntity>,
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

/// One detected conflict, with the rule-table outcome attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub rid: Uuid,
    pub api_name: String,
    /// Narrower locus when known (e.g. a property field).
    pub field: Option<String>,
    pub description: String,
    pub severity: Severity,
    /// Machine-readable resolution tag, e.g. `widen_to_long`, `union_enum`.
    pub resolution: String,
    pub auto_resolved: bool,
    /// Offered to the operator when the conflict is manual.
    #[serde(default)]
    pub suggested_resolutions: Vec<String>,
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    Success,
    ManualRequired,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeStats {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub overlaps: usize,
    pub auto_resolved: usize,
}

#[derive(Debug, Clone)]
pub struct MergeResult {
    pub status: MergeStatus,
    pub conflicts: Vec<Conflict>,
    /// The merged snapshot; empty unless `status == Success`.
    pub merged: Vec<SchemaEntity>,
    /// SHA-256 over the canonical merged snapshot; stable across repeated
    /// merges of the same ancestor pair.
    pub result_hash: String,
    pub stats: MergeStats,
}

impl MergeResult {
    pub fn manual_conflicts(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts.iter().filter(|c| !c.auto_resolved)
    }
}

/// Caller options.
#[derive(Debug, Clone, Copy)]
pub struct MergeOptions {
    /// Apply automatic resolutions at INFO/WARN severity.
    pub auto_resolve: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self { auto_resolve: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_gates_auto_resolution() {
        assert!(Severity::Info.auto_resolvable());
        assert!(Severity::Warn.auto_resolvable());
        assert!(!Severity::Error.auto_resolvable());
        assert!(!Severity::Block.auto_resolvable());
        assert!(Severity::Info < Severity::Block);
    }
}
