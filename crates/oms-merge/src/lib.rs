//! Merge and conflict-resolution engine.
//!
//! Pure three-way merge over the schema graph: no IO, no clock beyond the
//! timestamps already on the entities. The daemon persists a `Success`
//! result through the store gateway in a single transaction and emits
//! `branch.merged`; this crate only computes.

mod arena;
mod compact;
mod diff;
mod engine;
mod rules;
mod types;
mod validate;

pub use arena::{ChangeGraph, NodeIx};
pub use compact::{compact, CompactedSegment, CompactionResult, Commit};
pub use diff::{diff, semantically_equal, snapshot_map};
pub use engine::{merge, snapshot_hash};
pub use rules::{resolve_overlap, RuleOutcome};
pub use types::{
    Change, ChangeKind, Conflict, MergeOptions, MergeResult, MergeStats, MergeStatus, Severity,
};
