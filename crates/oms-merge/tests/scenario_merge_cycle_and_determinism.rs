//! A merge that closes a reference cycle is blocked, and merging the same
//! ancestor pair twice yields the same result hash.

use chrono::Utc;
use oms_merge::{merge, MergeOptions, MergeStatus, Severity};
use oms_schemas::{
    EntityHeader, EntityStatus, ObjectTypeSpec, SchemaEntity, Visibility,
};
use uuid::Uuid;

fn header(api_name: &str) -> EntityHeader {
    EntityHeader {
        rid: Uuid::new_v4(),
        api_name: api_name.to_string(),
        display_name: api_name.to_string(),
        status: EntityStatus::Active,
        visibility: Visibility::Normal,
        created_at_utc: Utc::now(),
        created_by: "alice".to_string(),
        updated_at_utc: Utc::now(),
        updated_by: "alice".to_string(),
    }
}

fn object(api_name: &str, implements: Vec<Uuid>) -> SchemaEntity {
    SchemaEntity::ObjectType(ObjectTypeSpec {
        header: header(api_name),
        implements,
        description: None,
    })
}

#[test]
fn merge_closing_a_cycle_is_blocked() {
    let a = object("A", vec![]);
    let b = object("B", vec![a.rid()]);
    let base = vec![a.clone(), b.clone()];

    // Source points A at B, closing A -> B -> A.
    let mut a_src = a.clone();
    if let SchemaEntity::ObjectType(o) = &mut a_src {
        o.implements = vec![b.rid()];
    }
    let source = vec![a_src, b.clone()];

    let target = base.clone();

    let result = merge(&base, &source, &target, MergeOptions::default());

    assert_eq!(result.status, MergeStatus::ManualRequired);
    let blocked: Vec<_> = result
        .conflicts
        .iter()
        .filter(|c| c.severity == Severity::Block)
        .collect();
    assert_eq!(blocked.len(), 1);
    assert!(blocked[0].description.contains("cycle"));
    assert_eq!(blocked[0].resolution, "manual_refactor");
}

#[test]
fn repeated_merge_of_same_ancestor_pair_is_deterministic() {
    let a = object("A", vec![]);
    let b = object("B", vec![]);
    let base = vec![a.clone(), b.clone()];

    let c = object("C", vec![]);
    let source = vec![a.clone(), b.clone(), c.clone()];

    let mut b_mod = b.clone();
    if let SchemaEntity::ObjectType(o) = &mut b_mod {
        o.description = Some("edited".to_string());
    }
    let target = vec![a.clone(), b_mod.clone()];

    let first = merge(&base, &source, &target, MergeOptions::default());
    let second = merge(&base, &source, &target, MergeOptions::default());

    assert_eq!(first.status, MergeStatus::Success);
    assert_eq!(first.result_hash, second.result_hash);
    assert_eq!(first.merged.len(), 3);
    assert_eq!(first.stats.added, 1);
    assert_eq!(first.stats.modified, 1);
}
