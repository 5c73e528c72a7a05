//! Three-way diff inputs: classify one side's changes against the base.

use std::collections::BTreeMap;

use uuid::Uuid;

use oms_schemas::SchemaEntity;

use crate::types::{Change, ChangeKind};

/// Snapshot as a rid-keyed map. BTreeMap keeps iteration deterministic,
/// which the result hash relies on.
pub fn snapshot_map(entities: &[SchemaEntity]) -> BTreeMap<Uuid, SchemaEntity> {
    entities.iter().map(|e| (e.rid(), e.clone())).collect()
}

/// Changes `side` made relative to `base`, keyed by rid.
///
/// Entity equality ignores the header's `updated_*` bookkeeping: touching
/// an entity without changing its meaning is not a change.
pub fn diff(
    base: &BTreeMap<Uuid, SchemaEntity>,
    side: &BTreeMap<Uuid, SchemaEntity>,
) -> BTreeMap<Uuid, Change> {
    let mut out = BTreeMap::new();

    for (rid, entity) in side {
        match base.get(rid) {
            None => {
                out.insert(
                    *rid,
                    Change {
                        kind: ChangeKind::Add,
                        entity: Some(entity.clone()),
                    },
                );
            }
            Some(base_entity) if !semantically_equal(base_entity, entity) => {
                out.insert(
                    *rid,
                    Change {
                        kind: ChangeKind::Modify,
                        entity: Some(entity.clone()),
                    },
                );
            }
            Some(_) => {}
        }
    }

    for rid in base.keys() {
        if !side.contains_key(rid) {
            out.insert(
                *rid,
                Change {
                    kind: ChangeKind::Delete,
                    entity: None,
                },
            );
        }
    }

    out
}

/// Equality modulo `updated_at_utc` / `updated_by`.
pub fn semantically_equal(a: &SchemaEntity, b: &SchemaEntity) -> bool {
    let mut a = a.clone();
    let mut b = b.clone();
    let epoch = chrono::DateTime::<chrono::Utc>::UNIX_EPOCH;
    for e in [&mut a, &mut b] {
        let h = e.header_mut();
        h.updated_at_utc = epoch;
        h.updated_by.clear();
    }
    a == b
}
