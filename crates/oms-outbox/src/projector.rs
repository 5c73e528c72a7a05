//! Audit projector.
//!
//! Audit rows commit inside the business transaction; this worker mirrors
//! each one onto the outbox under `audit.activity.v1` so downstream
//! consumers see the activity stream. The outbox insert and the
//! projection-tracking row commit together, so each audit event projects
//! exactly once.

use std::time::Duration;

use serde_json::json;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{info, warn};

use oms_db::outbox::NewOutboxEvent;
use oms_schemas::{subjects, AuditRecord, EventEnvelope};

pub const PROJECTOR_NAME: &str = "audit-projector";

/// Project one batch of unprojected audit events. Returns how many were
/// projected.
pub async fn project_audit_once(pool: &PgPool, batch_size: i64) -> anyhow::Result<usize> {
    let records = oms_db::audit_list_unprojected(pool, PROJECTOR_NAME, batch_size).await?;
    let mut projected = 0;

    for record in records {
        let envelope = audit_envelope(&record);
        let data = serde_json::to_value(&envelope)?;

        let mut tx = oms_db::begin(pool).await?;
        // Another projector instance may have claimed it between the list
        // and here; the tracking row decides.
        if !oms_db::consumer_mark_processed_tx(&mut tx, PROJECTOR_NAME, record.event_id).await? {
            tx.rollback().await?;
            continue;
        }
        oms_db::outbox_insert(
            &mut tx,
            &NewOutboxEvent {
                event_id: envelope.id,
                event_type: envelope.event_type.clone(),
                subject: subjects::AUDIT_ACTIVITY.to_string(),
                correlation_id: envelope.ce_correlationid,
                idempotency_key: Some(format!("audit:{}", record.event_id)),
                data,
                max_retries: 3,
            },
        )
        .await?;
        tx.commit().await?;
        projected += 1;
    }

    Ok(projected)
}

/// The audit record rides as the event payload; its own `event_id` becomes
/// the causation id so consumers can join back to the audit trail.
fn audit_envelope(record: &AuditRecord) -> EventEnvelope {
    let mut envelope = EventEnvelope::new(
        format!("com.oms.{}", subjects::AUDIT_ACTIVITY),
        "/oms/audit",
        subjects::AUDIT_ACTIVITY,
        json!({
            "action": record.action,
            "actor_id": record.actor_id,
            "actor_roles": record.actor_roles,
            "target_kind": record.target_kind,
            "target_id": record.target_id,
            "success": record.success,
            "error_code": record.error_code,
            "duration_ms": record.duration_ms,
            "time": record.time_utc,
        }),
        record.branch.clone().unwrap_or_default(),
        record.actor_id.clone(),
    );
    envelope.ce_causationid = Some(record.event_id);
    envelope
}

/// Spawn the projector loop.
pub fn spawn_audit_projector(
    pool: PgPool,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match project_audit_once(&pool, 64).await {
                        Ok(0) => {}
                        Ok(n) => info!(projected = n, "audit events projected to outbox"),
                        Err(e) => warn!(error = %format!("{e:#}"), "audit projection pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("audit projector stopping");
                        return;
                    }
                }
            }
        }
    })
}
