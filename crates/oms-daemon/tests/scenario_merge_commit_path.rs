//! Full merge path through the command layer: create branch + entities,
//! record a changeset, approve, merge — and verify the merged snapshot,
//! the branch head, the outbox event, and the changeset's immutability.
//!
//! Skips without OMS_DATABASE_URL (local + CI friendly).

use std::path::PathBuf;
use std::sync::Arc;

use oms_daemon::{commands, state::AppState};
use oms_schemas::{
    BaseType, ChangeSetState, EntityMutation, MutationOp, SchemaEntity,
};

async fn state_with_db() -> anyhow::Result<Option<Arc<AppState>>> {
    if std::env::var(oms_db::ENV_DB_URL).is_err() {
        return Ok(None);
    }
    let pool = oms_db::testkit_db_pool().await?;
    let cfg = oms_config::CoreConfig::from_env()?;
    Ok(Some(Arc::new(
        AppState::new(
            pool,
            cfg,
            PathBuf::from("/tmp/oms-test-indexes"),
            "testhash".to_string(),
        )
        .with_dev_anon(true),
    )))
}

fn dev_ctx() -> oms_auth::UserContext {
    oms_auth::UserContext {
        sub: "test:alice".to_string(),
        username: "alice".to_string(),
        email: None,
        roles: vec!["editor".to_string()],
        scopes: vec!["api:schemas:write".to_string(), "api:branches:write".to_string()],
        tenant: None,
    }
}

fn unique(name: &str) -> String {
    format!("{name}-{}", &uuid::Uuid::new_v4().to_string()[..8])
}

#[tokio::test]
async fn approved_changeset_merges_and_becomes_immutable() -> anyhow::Result<()> {
    let Some(st) = state_with_db().await? else {
        eprintln!("SKIP: OMS_DATABASE_URL not set");
        return Ok(());
    };
    let ctx = dev_ctx();

    let target = unique("main");
    commands::create_branch(&st, &ctx, &target).await.map_err(api_err)?;

    // Seed the target with an object type + an int property.
    let order = object_type_entity("Order");
    let total = property_entity("total", order.rid(), BaseType::Integer);
    commands::put_entity(&st, &ctx, &target, order.clone(), None)
        .await
        .map_err(api_err)?;
    commands::put_entity(&st, &ctx, &target, total.clone(), None)
        .await
        .map_err(api_err)?;

    // Changeset: widen the property to long.
    let mut widened = total.clone();
    if let SchemaEntity::Property(p) = &mut widened {
        p.base_type = BaseType::Long;
    }
    let cs = commands::create_changeset(
        &st,
        &ctx,
        &unique("feature"),
        &target,
        vec![EntityMutation {
            kind: widened.kind(),
            rid: widened.rid(),
            op: MutationOp::Modify,
            entity: Some(widened.clone()),
        }],
    )
    .await
    .map_err(api_err)?;

    commands::approve_changeset(&st, &ctx, cs.id).await.map_err(api_err)?;

    let result = commands::merge_changeset(&st, &ctx, &target, cs.id, true)
        .await
        .map_err(api_err)?;
    assert_eq!(result.status, oms_merge::MergeStatus::Success);

    // Merged snapshot persisted with the widened type.
    let row = oms_db::entity_get(&st.pool, &target, total.rid()).await?;
    match row.entity {
        SchemaEntity::Property(p) => assert_eq!(p.base_type, BaseType::Long),
        other => panic!("expected property, got {other:?}"),
    }

    // Branch head moved to the merge commit.
    let branch = oms_db::branch_get(&st.pool, &target).await?;
    assert_eq!(
        branch.head_commit.as_deref(),
        Some(&result.result_hash[..12])
    );

    // Merged changesets are immutable.
    let merged = oms_db::changeset_get(&st.pool, cs.id).await?;
    assert_eq!(merged.state, ChangeSetState::Merged);
    let mut tx = oms_db::begin(&st.pool).await?;
    let moved = oms_db::changeset_set_state(
        &mut tx,
        cs.id,
        ChangeSetState::Merged,
        ChangeSetState::Draft,
        "anyone",
    )
    .await?;
    tx.commit().await?;
    assert!(!moved, "terminal changesets accept no transitions");

    // Every lifecycle step left an audit row in the same transaction.
    for action in ["branch.create", "branch.merge"] {
        let (n,): (i64,) = sqlx::query_as(
            "select count(*)::bigint from audit_events where action = $1 and branch = $2",
        )
        .bind(action)
        .bind(&target)
        .fetch_one(&st.pool)
        .await?;
        assert_eq!(n, 1, "missing audit row for {action}");
    }
    for action in ["changeset.create", "changeset.approve"] {
        let (n,): (i64,) = sqlx::query_as(
            "select count(*)::bigint from audit_events where action = $1 and target_id = $2",
        )
        .bind(action)
        .bind(cs.id.to_string())
        .fetch_one(&st.pool)
        .await?;
        assert_eq!(n, 1, "missing audit row for {action}");
    }

    Ok(())
}

fn api_err(e: oms_daemon::api_types::ApiError) -> anyhow::Error {
    anyhow::anyhow!("{e:?}")
}

// Local builders (oms-daemon does not depend on oms-testkit; testkit
// depends on the lower layers only).
fn object_type_entity(api_name: &str) -> SchemaEntity {
    use chrono::Utc;
    use oms_schemas::{EntityHeader, EntityStatus, ObjectTypeSpec, Visibility};
    SchemaEntity::ObjectType(ObjectTypeSpec {
        header: EntityHeader {
            rid: uuid::Uuid::new_v4(),
            api_name: api_name.to_string(),
            display_name: api_name.to_string(),
            status: EntityStatus::Active,
            visibility: Visibility::Normal,
            created_at_utc: Utc::now(),
            created_by: "test".to_string(),
            updated_at_utc: Utc::now(),
            updated_by: "test".to_string(),
        },
        implements: vec![],
        description: None,
    })
}

fn property_entity(
    api_name: &str,
    object_rid: uuid::Uuid,
    base_type: BaseType,
) -> SchemaEntity {
    use chrono::Utc;
    use oms_schemas::{
        EntityHeader, EntityStatus, PropertyConstraints, PropertySpec, Visibility,
    };
    SchemaEntity::Property(PropertySpec {
        header: EntityHeader {
            rid: uuid::Uuid::new_v4(),
            api_name: api_name.to_string(),
            display_name: api_name.to_string(),
            status: EntityStatus::Active,
            visibility: Visibility::Normal,
            created_at_utc: Utc::now(),
            created_by: "test".to_string(),
            updated_at_utc: Utc::now(),
            updated_by: "test".to_string(),
        },
        object_rid,
        base_type,
        value_format: None,
        constraints: PropertyConstraints::default(),
    })
}
