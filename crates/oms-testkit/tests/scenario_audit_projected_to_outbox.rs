//! Every committed audit row is mirrored onto the outbox exactly once
//! under `audit.activity.v1`, no matter how many projector passes run.

use chrono::Utc;
use oms_schemas::{AuditChanges, AuditRecord};
use serde_json::json;
use uuid::Uuid;

fn record(action: &str) -> AuditRecord {
    AuditRecord {
        event_id: Uuid::new_v4(),
        action: action.to_string(),
        actor_id: "alice".to_string(),
        actor_roles: vec!["editor".to_string()],
        target_kind: "object_type".to_string(),
        target_id: "User".to_string(),
        branch: Some("main".to_string()),
        success: true,
        error_code: None,
        duration_ms: 5,
        changes: AuditChanges::default(),
        metadata: json!({}),
        time_utc: Utc::now(),
    }
}

#[tokio::test]
async fn audit_rows_project_exactly_once() -> anyhow::Result<()> {
    let Some(pool) = oms_testkit::db_pool().await? else {
        eprintln!("SKIP: OMS_DATABASE_URL not set");
        return Ok(());
    };

    let rec = record("schema.created");
    let mut tx = oms_db::begin(&pool).await?;
    oms_db::audit_insert(&mut tx, &rec).await?;
    tx.commit().await?;

    // First pass projects it (other tests' rows may project alongside).
    let first = oms_outbox::project_audit_once(&pool, 256).await?;
    assert!(first >= 1);

    let (n,): (i64,) = sqlx::query_as(
        "select count(*)::bigint from outbox_events where idempotency_key = $1",
    )
    .bind(format!("audit:{}", rec.event_id))
    .fetch_one(&pool)
    .await?;
    assert_eq!(n, 1, "one outbox row per audit event");

    // Further passes never project it again.
    oms_outbox::project_audit_once(&pool, 256).await?;
    let (n,): (i64,) = sqlx::query_as(
        "select count(*)::bigint from outbox_events where idempotency_key = $1",
    )
    .bind(format!("audit:{}", rec.event_id))
    .fetch_one(&pool)
    .await?;
    assert_eq!(n, 1);

    Ok(())
}
