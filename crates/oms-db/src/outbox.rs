//! Transactional outbox rows and dispatcher queries.
//!
//! Insertion happens in the same transaction as the business change.
//! The dispatcher claims batches with `FOR UPDATE SKIP LOCKED` so
//! concurrent dispatchers never claim the same row, and marks outcomes
//! with optimistic status transitions.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use oms_schemas::{OutboxRecord, OutboxStatus};

use crate::StoreError;

const OUTBOX_COLUMNS: &str = "id, event_id, event_type, subject, correlation_id, idempotency_key, \
     data, status, retry_count, max_retries, next_retry_at_utc, created_at_utc, published_at_utc";

fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<OutboxRecord, StoreError> {
    let status_s: String = row.try_get("status")?;
    Ok(OutboxRecord {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        event_type: row.try_get("event_type")?,
        subject: row.try_get("subject")?,
        correlation_id: row.try_get("correlation_id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        payload: row.try_get("data")?,
        status: OutboxStatus::parse(&status_s).map_err(StoreError::Internal)?,
        retry_count: row.try_get("retry_count")?,
        max_retries: row.try_get("max_retries")?,
        next_retry_at_utc: row.try_get("next_retry_at_utc")?,
        created_at_utc: row.try_get("created_at_utc")?,
        published_at_utc: row.try_get("published_at_utc")?,
    })
}

/// What a command inserts; ids and timestamps are server-assigned.
#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub subject: String,
    pub correlation_id: Uuid,
    pub idempotency_key: Option<String>,
    /// Full serialized CloudEvents envelope.
    pub data: serde_json::Value,
    pub max_retries: i32,
}

/// Insert one outbox row inside `tx`.
///
/// Idempotent on `idempotency_key`: a duplicate key returns `Ok(false)`
/// without a second row, so retried commands cannot double-publish.
pub async fn outbox_insert(
    tx: &mut Transaction<'_, Postgres>,
    ev: &NewOutboxEvent,
) -> Result<bool, StoreError> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        insert into outbox_events
            (event_id, event_type, subject, correlation_id, idempotency_key, data, max_retries)
        values ($1,$2,$3,$4,$5,$6,$7)
        on conflict (idempotency_key) do nothing
        returning id
        "#,
    )
    .bind(ev.event_id)
    .bind(&ev.event_type)
    .bind(&ev.subject)
    .bind(ev.correlation_id)
    .bind(&ev.idempotency_key)
    .bind(&ev.data)
    .bind(ev.max_retries)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(row.is_some())
}

/// Atomically claim up to `batch_size` dispatchable rows.
///
/// Dispatchable = `pending`, or `failed` with `next_retry_at_utc <= now`
/// and retries remaining. Claimed rows move to `processing`; the caller
/// MUST resolve each via `outbox_mark_published`, `outbox_mark_failed`, or
/// `outbox_release_claim`.
pub async fn outbox_claim_batch(
    pool: &PgPool,
    batch_size: i64,
    now: DateTime<Utc>,
) -> Result<Vec<OutboxRecord>, StoreError> {
    let rows = sqlx::query(&format!(
        r#"
        with to_claim as (
            select id
            from outbox_events
            where status = 'pending'
               or (status = 'failed'
                   and retry_count < max_retries
                   and next_retry_at_utc is not null
                   and next_retry_at_utc <= $2)
            order by id asc
            limit $1
            for update skip locked
        )
        update outbox_events
           set status = 'processing'
         where id in (select id from to_claim)
        returning {OUTBOX_COLUMNS}
        "#
    ))
    .bind(batch_size)
    .bind(now)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_record).collect()
}

/// `processing → published`. Returns false if the row was not processing.
pub async fn outbox_mark_published(pool: &PgPool, id: i64) -> Result<bool, StoreError> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        update outbox_events
           set status = 'published',
               published_at_utc = coalesce(published_at_utc, now())
         where id = $1 and status = 'processing'
        returning id
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

/// `processing → failed` with the retry bookkeeping computed by the
/// dispatcher. Returns the new retry count.
pub async fn outbox_mark_failed(
    pool: &PgPool,
    id: i64,
    next_retry_at: Option<DateTime<Utc>>,
) -> Result<i32, StoreError> {
    let row: Option<(i32,)> = sqlx::query_as(
        r#"
        update outbox_events
           set status = 'failed',
               retry_count = retry_count + 1,
               next_retry_at_utc = $2
         where id = $1 and status = 'processing'
        returning retry_count
        "#,
    )
    .bind(id)
    .bind(next_retry_at)
    .fetch_optional(pool)
    .await?;

    match row {
        Some((n,)) => Ok(n),
        None => Err(StoreError::NotFound {
            what: format!("processing outbox row {id}"),
        }),
    }
}

/// `processing → pending` without counting a retry (dispatcher shutdown
/// mid-flight).
pub async fn outbox_release_claim(pool: &PgPool, id: i64) -> Result<bool, StoreError> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        update outbox_events
           set status = 'pending'
         where id = $1 and status = 'processing'
        returning id
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

pub async fn outbox_get_by_event_id(
    pool: &PgPool,
    event_id: Uuid,
) -> Result<Option<OutboxRecord>, StoreError> {
    let row = sqlx::query(&format!(
        "select {OUTBOX_COLUMNS} from outbox_events where event_id = $1"
    ))
    .bind(event_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_record).transpose()
}

// ---------------------------------------------------------------------------
// Dead letters
// ---------------------------------------------------------------------------

/// Route an exhausted record to the dead-letter store.
///
/// Idempotent on `event_id` so a crash between DLQ insert and the final
/// status update cannot produce a second dead letter. Returns `true` if
/// this call created the dead letter.
pub async fn dead_letter_insert(
    pool: &PgPool,
    rec: &OutboxRecord,
    last_error: &str,
) -> Result<bool, StoreError> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        insert into outbox_dead_letters
            (event_id, event_type, subject, data, last_error, retry_count, created_at_utc)
        values ($1,$2,$3,$4,$5,$6,$7)
        on conflict (event_id) do nothing
        returning id
        "#,
    )
    .bind(rec.event_id)
    .bind(&rec.event_type)
    .bind(&rec.subject)
    .bind(&rec.payload)
    .bind(last_error)
    .bind(rec.retry_count)
    .bind(rec.created_at_utc)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

pub async fn dead_letters_count(pool: &PgPool) -> Result<i64, StoreError> {
    let (n,): (i64,) = sqlx::query_as("select count(*)::bigint from outbox_dead_letters")
        .fetch_one(pool)
        .await?;
    Ok(n)
}

// ---------------------------------------------------------------------------
// Consumer tracking
// ---------------------------------------------------------------------------

/// Record that `consumer_name` processed `event_id`.
///
/// Returns `true` if this is the first time (side effects should run),
/// `false` on redelivery (side effects must be skipped).
pub async fn consumer_mark_processed(
    pool: &PgPool,
    consumer_name: &str,
    event_id: Uuid,
) -> Result<bool, StoreError> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        insert into event_consumer_tracking (consumer_name, event_id)
        values ($1, $2)
        on conflict (consumer_name, event_id) do nothing
        returning consumer_name
        "#,
    )
    .bind(consumer_name)
    .bind(event_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

/// Transaction-scoped variant: the tracking row commits with whatever the
/// caller writes alongside it (the audit projector pairs it with its
/// outbox insert).
pub async fn consumer_mark_processed_tx(
    tx: &mut Transaction<'_, Postgres>,
    consumer_name: &str,
    event_id: Uuid,
) -> Result<bool, StoreError> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        insert into event_consumer_tracking (consumer_name, event_id)
        values ($1, $2)
        on conflict (consumer_name, event_id) do nothing
        returning consumer_name
        "#,
    )
    .bind(consumer_name)
    .bind(event_id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.is_some())
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct OutboxStats {
    pub pending: i64,
    pub processing: i64,
    pub published: i64,
    pub failed: i64,
    pub dead_letters: i64,
}

pub async fn outbox_stats(pool: &PgPool) -> Result<OutboxStats, StoreError> {
    let rows = sqlx::query(
        r#"
        select status, count(*)::bigint as n
        from outbox_events
        group by status
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut stats = OutboxStats::default();
    for row in rows {
        let status: String = row.try_get("status")?;
        let n: i64 = row.try_get("n")?;
        match status.as_str() {
            "pending" => stats.pending = n,
            "processing" => stats.processing = n,
            "published" => stats.published = n,
            "failed" => stats.failed = n,
            _ => {}
        }
    }
    stats.dead_letters = dead_letters_count(pool).await?;
    Ok(stats)
}
