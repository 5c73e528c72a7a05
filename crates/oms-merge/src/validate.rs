//! Post-merge validation.
//!
//! Runs over the merged snapshot after the rule table has resolved
//! overlaps. Violations are graded BLOCK and fail the merge; the caller
//! rolls back.

use std::collections::{BTreeMap, HashMap, HashSet};

use uuid::Uuid;

use oms_schemas::{EntityKind, SchemaEntity};

use crate::types::{Conflict, Severity};

pub fn validate_snapshot(entities: &[SchemaEntity]) -> Vec<Conflict> {
    let mut out = Vec::new();
    let by_rid: BTreeMap<Uuid, &SchemaEntity> = entities.iter().map(|e| (e.rid(), e)).collect();

    // Referential integrity: every reference resolves.
    for e in entities {
        for r in e.references() {
            if !by_rid.contains_key(&r) {
                out.push(block(
                    e,
                    format!("reference to missing entity {r}"),
                    "restore_referenced_entity",
                ));
            }
        }
    }

    // api_name unique per kind.
    let mut seen: HashSet<(EntityKind, &str)> = HashSet::new();
    for e in entities {
        if !seen.insert((e.kind(), e.api_name())) {
            out.push(block(
                e,
                format!(
                    "api_name '{}' used by more than one {}",
                    e.api_name(),
                    e.kind().as_str()
                ),
                "rename_one_side",
            ));
        }
    }

    // Interface satisfaction: implementors carry every required property
    // with a compatible type.
    let mut props_by_owner: HashMap<Uuid, Vec<&SchemaEntity>> = HashMap::new();
    for e in entities {
        if let SchemaEntity::Property(p) = e {
            props_by_owner.entry(p.object_rid).or_default().push(e);
        }
    }

    for e in entities {
        let SchemaEntity::ObjectType(obj) = e else { continue };
        for iface_rid in &obj.implements {
            let Some(SchemaEntity::Interface(iface)) = by_rid.get(iface_rid).copied() else {
                // Dangling implements already reported above.
                continue;
            };
            let props = props_by_owner.get(&obj.header.rid);
            for req in &iface.required_properties {
                let satisfied = props.map_or(false, |props| {
                    props.iter().any(|p| {
                        let SchemaEntity::Property(p) = p else { return false };
                        p.header.api_name == req.api_name
                            && (p.base_type == req.base_type || p.base_type.widens_to(req.base_type))
                    })
                });
                if !satisfied {
                    out.push(block(
                        e,
                        format!(
                            "object '{}' no longer satisfies interface '{}': missing required property '{}'",
                            obj.header.api_name, iface.header.api_name, req.api_name
                        ),
                        "add_missing_property",
                    ));
                }
            }
        }
    }

    out
}

fn block(e: &SchemaEntity, description: String, suggestion: &str) -> Conflict {
    Conflict {
        rid: e.rid(),
        api_name: e.api_name().to_string(),
        field: None,
        description,
        severity: Severity::Block,
        resolution: "manual".to_string(),
        auto_resolved: false,
        suggested_resolutions: vec![suggestion.to_string()],
    }
}
