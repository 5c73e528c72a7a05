//! Audit event rows (append-only semantics enforced at app layer: no
//! update or delete query exists in this crate).

use sqlx::{PgPool, Postgres, Row, Transaction};

use oms_schemas::{AuditChanges, AuditRecord};

use crate::StoreError;

/// Insert one audit row inside `tx` so the audit record commits with the
/// change it describes.
pub async fn audit_insert(
    tx: &mut Transaction<'_, Postgres>,
    rec: &AuditRecord,
) -> Result<(), StoreError> {
    let changes = serde_json::to_value(&rec.changes)
        .map_err(|e| StoreError::Internal(format!("audit changes encode: {e}")))?;

    sqlx::query(
        r#"
        insert into audit_events (
          event_id, action, actor_id, actor_roles, target_kind, target_id,
          branch, success, error_code, duration_ms, changes, metadata, time_utc
        ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
        "#,
    )
    .bind(rec.event_id)
    .bind(&rec.action)
    .bind(&rec.actor_id)
    .bind(&rec.actor_roles)
    .bind(&rec.target_kind)
    .bind(&rec.target_id)
    .bind(&rec.branch)
    .bind(rec.success)
    .bind(&rec.error_code)
    .bind(rec.duration_ms)
    .bind(&changes)
    .bind(&rec.metadata)
    .bind(rec.time_utc)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Most recent audit events, newest first.
pub async fn audit_list_recent(pool: &PgPool, limit: i64) -> Result<Vec<AuditRecord>, StoreError> {
    let rows = sqlx::query(
        r#"
        select event_id, action, actor_id, actor_roles, target_kind, target_id,
               branch, success, error_code, duration_ms, changes, metadata, time_utc
        from audit_events
        order by time_utc desc
        limit $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows_to_records(rows)
}

/// Audit events the named projector has not yet pushed to the outbox,
/// oldest first.
pub async fn audit_list_unprojected(
    pool: &PgPool,
    projector_name: &str,
    limit: i64,
) -> Result<Vec<AuditRecord>, StoreError> {
    let rows = sqlx::query(
        r#"
        select a.event_id, a.action, a.actor_id, a.actor_roles, a.target_kind, a.target_id,
               a.branch, a.success, a.error_code, a.duration_ms, a.changes, a.metadata, a.time_utc
        from audit_events a
        left join event_consumer_tracking t
               on t.event_id = a.event_id and t.consumer_name = $1
        where t.event_id is null
        order by a.id asc
        limit $2
        "#,
    )
    .bind(projector_name)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows_to_records(rows)
}

fn rows_to_records(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<AuditRecord>, StoreError> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let changes_json: serde_json::Value = row.try_get("changes")?;
        let changes: AuditChanges = serde_json::from_value(changes_json)
            .map_err(|e| StoreError::Internal(format!("audit changes decode: {e}")))?;
        out.push(AuditRecord {
            event_id: row.try_get("event_id")?,
            action: row.try_get("action")?,
            actor_id: row.try_get("actor_id")?,
            actor_roles: row.try_get("actor_roles")?,
            target_kind: row.try_get("target_kind")?,
            target_id: row.try_get("target_id")?,
            branch: row.try_get("branch")?,
            success: row.try_get("success")?,
            error_code: row.try_get("error_code")?,
            duration_ms: row.try_get("duration_ms")?,
            changes,
            metadata: row.try_get("metadata")?,
            time_utc: row.try_get("time_utc")?,
        });
    }
    Ok(out)
}
