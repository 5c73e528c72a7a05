//! Three-way merge driver.
//!
//! 1. diff(base, source) and diff(base, target);
//! 2. apply non-overlapping changes directly;
//! 3. run each overlap through the rule table;
//! 4. detect cycles (BLOCK) and run post-merge validation;
//! 5. grade the outcome: `Success`, `ManualRequired`, or `Failed`.
//!
//! The engine is pure: persistence, events, and audit happen in the
//! caller's transaction after a `Success`.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use oms_schemas::SchemaEntity;

use crate::arena::ChangeGraph;
use crate::diff::{diff, snapshot_map};
use crate::rules::resolve_overlap;
use crate::types::{
    ChangeKind, Conflict, MergeOptions, MergeResult, MergeStats, MergeStatus, Severity,
};
use crate::validate::validate_snapshot;

pub fn merge(
    base: &[SchemaEntity],
    source: &[SchemaEntity],
    target: &[SchemaEntity],
    opts: MergeOptions,
) -> MergeResult {
    let base_map = snapshot_map(base);
    let source_map = snapshot_map(source);
    let target_map = snapshot_map(target);

    let src_diff = diff(&base_map, &source_map);
    let tgt_diff = diff(&base_map, &target_map);

    let mut merged: BTreeMap<Uuid, SchemaEntity> = base_map.clone();
    let mut conflicts: Vec<Conflict> = Vec::new();
    let mut stats = MergeStats::default();

    let mut rids: Vec<Uuid> = src_diff.keys().chain(tgt_diff.keys()).copied().collect();
    rids.sort();
    rids.dedup();

    for rid in rids {
        match (src_diff.get(&rid), tgt_diff.get(&rid)) {
            (Some(change), None) | (None, Some(change)) => {
                match change.kind {
                    ChangeKind::Add => stats.added += 1,
                    ChangeKind::Modify => stats.modified += 1,
                    ChangeKind::Delete => stats.deleted += 1,
                }
                match &change.entity {
                    Some(e) => {
                        merged.insert(rid, e.clone());
                    }
                    None => {
                        merged.remove(&rid);
                    }
                }
            }
            (Some(sc), Some(tc)) => {
                stats.overlaps += 1;
                let outcome = resolve_overlap(base_map.get(&rid), sc, tc, opts);
                stats.auto_resolved +=
                    outcome.conflicts.iter().filter(|c| c.auto_resolved).count();
                conflicts.extend(outcome.conflicts);
                match outcome.merged {
                    Some(e) => {
                        merged.insert(rid, e);
                    }
                    None => {
                        merged.remove(&rid);
                    }
                }
            }
            (None, None) => {}
        }
    }

    let merged_vec: Vec<SchemaEntity> = merged.into_values().collect();

    // Cycle detection on the merged reference graph.
    let graph = ChangeGraph::build(&merged_vec);
    if let Some(cycle) = graph.find_cycle() {
        let names: Vec<String> = cycle
            .iter()
            .filter_map(|rid| graph.lookup(*rid).map(|ix| graph.node(ix).entity.api_name().to_string()))
            .collect();
        conflicts.push(Conflict {
            rid: cycle[0],
            api_name: names.first().cloned().unwrap_or_default(),
            field: None,
            description: format!("merge introduces a reference cycle: {}", names.join(" -> ")),
            severity: Severity::Block,
            resolution: "manual_refactor".to_string(),
            auto_resolved: false,
            suggested_resolutions: vec!["break_cycle_by_removing_a_link".to_string()],
        });
    }

    // Post-merge validation (referential integrity, api-name uniqueness,
    // interface satisfaction).
    let validation_failures = validate_snapshot(&merged_vec);
    let failed = !validation_failures.is_empty();
    conflicts.extend(validation_failures);

    let manual_remaining = conflicts.iter().any(|c| !c.auto_resolved);

    let status = if failed {
        MergeStatus::Failed
    } else if manual_remaining {
        MergeStatus::ManualRequired
    } else {
        MergeStatus::Success
    };

    let result_hash = snapshot_hash(&merged_vec);

    MergeResult {
        status,
        conflicts,
        merged: if status == MergeStatus::Success { merged_vec } else { Vec::new() },
        result_hash,
        stats,
    }
}

/// SHA-256 over the rid-sorted merged snapshot. Two merges of the same
/// ancestor pair produce the same hash.
pub fn snapshot_hash(entities: &[SchemaEntity]) -> String {
    let mut sorted: Vec<&SchemaEntity> = entities.iter().collect();
    sorted.sort_by_key(|e| e.rid());

    let mut hasher = Sha256::new();
    for e in sorted {
        // Struct field order is fixed, so the JSON bytes are stable.
        let json = serde_json::to_string(e).unwrap_or_default();
        hasher.update(json.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
