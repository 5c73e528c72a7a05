//! Delete-vs-modify where the modification strengthens constraints must
//! not auto-resolve: the merge reports a single ERROR conflict with the
//! operator's options attached.

use chrono::Utc;
use oms_merge::{merge, MergeOptions, MergeStatus, Severity};
use oms_schemas::{
    BaseType, EntityHeader, EntityStatus, ObjectTypeSpec, PropertyConstraints, PropertySpec,
    SchemaEntity, Visibility,
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

fn user_with_email() -> (SchemaEntity, PropertySpec) {
    let user = SchemaEntity::ObjectType(ObjectTypeSpec {
        header: header("User"),
        implements: vec![],
        description: None,
    });
    let email = PropertySpec {
        header: header("email"),
        object_rid: user.rid(),
        base_type: BaseType::String,
        value_format: None,
        constraints: PropertyConstraints::default(),
    };
    (user, email)
}

#[test]
fn delete_vs_strengthened_modify_requires_manual_resolution() {
    let (user, email) = user_with_email();
    let base = vec![user.clone(), SchemaEntity::Property(email.clone())];

    // Source deletes User.email.
    let source = vec![user.clone()];

    // Target makes it required.
    let mut target_email = email.clone();
    target_email.constraints.required = true;
    let target = vec![user.clone(), SchemaEntity::Property(target_email)];

    let result = merge(&base, &source, &target, MergeOptions::default());

    assert_eq!(result.status, MergeStatus::ManualRequired);
    let manual: Vec<_> = result.manual_conflicts().collect();
    assert_eq!(manual.len(), 1);
    let c = manual[0];
    assert_eq!(c.severity, Severity::Error);
    assert!(!c.auto_resolved);
    assert_eq!(
        c.suggested_resolutions,
        vec!["keep_modification_with_soft_delete", "manual_merge"]
    );
}

#[test]
fn delete_vs_plain_modify_keeps_the_modification() {
    let (user, email) = user_with_email();
    let base = vec![user.clone(), SchemaEntity::Property(email.clone())];

    let source = vec![user.clone()];

    // A cosmetic modification: display name only.
    let mut target_email = email.clone();
    target_email.header.display_name = "E-mail address".to_string();
    let target = vec![user.clone(), SchemaEntity::Property(target_email)];

    let result = merge(&base, &source, &target, MergeOptions::default());

    assert_eq!(result.status, MergeStatus::Success);
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.conflicts[0].severity, Severity::Warn);
    assert!(result.conflicts[0].auto_resolved);
    assert!(result
        .merged
        .iter()
        .any(|e| e.api_name() == "email"), "modification wins over delete");
}

#[test]
fn delete_of_deprecated_entity_wins() {
    let (user, mut email) = user_with_email();
    email.header.status = EntityStatus::Deprecated;
    let base = vec![user.clone(), SchemaEntity::Property(email.clone())];

    let source = vec![user.clone()];

    let mut target_email = email.clone();
    target_email.header.display_name = "Email".to_string();
    let target = vec![user.clone(), SchemaEntity::Property(target_email)];

    let result = merge(&base, &source, &target, MergeOptions::default());

    assert_eq!(result.status, MergeStatus::Success);
    assert_eq!(result.conflicts[0].severity, Severity::Info);
    assert_eq!(result.conflicts[0].resolution, "delete_deprecated");
    assert!(!result.merged.iter().any(|e| e.api_name() == "email"));
}
