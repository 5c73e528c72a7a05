//! Lock rows and the lock audit trail.
//!
//! The store is the authority for lock state; the in-process cache in
//! `oms-locks` is advisory only. Every acquire/release/heartbeat writes a
//! `lock_audit` entry in the same transaction as the row change.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use oms_schemas::{Lock, LockScope, LockType};

use crate::StoreError;

fn row_to_lock(row: &sqlx::postgres::PgRow) -> Result<Lock, StoreError> {
    let scope_s: String = row.try_get("scope")?;
    let type_s: String = row.try_get("lock_type")?;
    Ok(Lock {
        id: row.try_get("id")?,
        branch: row.try_get("branch")?,
        scope: LockScope::parse(&scope_s).map_err(StoreError::Internal)?,
        resource_type: row.try_get("resource_type")?,
        resource_id: row.try_get("resource_id")?,
        lock_type: LockType::parse(&type_s).map_err(StoreError::Internal)?,
        holder: row.try_get("holder")?,
        acquired_at_utc: row.try_get("acquired_at_utc")?,
        expires_at_utc: row.try_get("expires_at_utc")?,
        last_heartbeat_utc: row.try_get("last_heartbeat_utc")?,
        heartbeat_interval_s: row.try_get("heartbeat_interval_s")?,
        heartbeat_source: row.try_get("heartbeat_source")?,
        auto_release: row.try_get("auto_release")?,
        reported_progress_pct: row.try_get("reported_progress_pct")?,
    })
}

const LOCK_COLUMNS: &str = "id, branch, scope, resource_type, resource_id, lock_type, holder, \
     acquired_at_utc, expires_at_utc, last_heartbeat_utc, heartbeat_interval_s, \
     heartbeat_source, auto_release, reported_progress_pct";

/// Insert a lock row inside `tx` (the manager holds the branch advisory
/// lock while deciding, so insert + audit commit atomically).
pub async fn lock_insert(tx: &mut Transaction<'_, Postgres>, lock: &Lock) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        insert into locks (
          id, branch, scope, resource_type, resource_id, lock_type, holder,
          acquired_at_utc, expires_at_utc, last_heartbeat_utc,
          heartbeat_interval_s, heartbeat_source, auto_release, reported_progress_pct
        ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)
        "#,
    )
    .bind(lock.id)
    .bind(&lock.branch)
    .bind(lock.scope.as_str())
    .bind(&lock.resource_type)
    .bind(&lock.resource_id)
    .bind(lock.lock_type.as_str())
    .bind(&lock.holder)
    .bind(lock.acquired_at_utc)
    .bind(lock.expires_at_utc)
    .bind(lock.last_heartbeat_utc)
    .bind(lock.heartbeat_interval_s)
    .bind(&lock.heartbeat_source)
    .bind(lock.auto_release)
    .bind(lock.reported_progress_pct)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn lock_get(pool: &PgPool, id: Uuid) -> Result<Option<Lock>, StoreError> {
    let row = sqlx::query(&format!("select {LOCK_COLUMNS} from locks where id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_lock).transpose()
}

/// Delete a lock row, returning it if it existed.
pub async fn lock_delete(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<Option<Lock>, StoreError> {
    let row = sqlx::query(&format!(
        "delete from locks where id = $1 returning {LOCK_COLUMNS}"
    ))
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?;
    row.as_ref().map(row_to_lock).transpose()
}

/// All lock rows for one branch (including expired rows; callers filter
/// with `Lock::is_expired`).
pub async fn locks_active_for_branch(pool: &PgPool, branch: &str) -> Result<Vec<Lock>, StoreError> {
    let rows = sqlx::query(&format!(
        "select {LOCK_COLUMNS} from locks where branch = $1 order by acquired_at_utc asc"
    ))
    .bind(branch)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_lock).collect()
}

/// Every lock row in the store. Used by sweepers and the lock-admin surface.
pub async fn locks_all(pool: &PgPool) -> Result<Vec<Lock>, StoreError> {
    let rows = sqlx::query(&format!(
        "select {LOCK_COLUMNS} from locks order by branch, acquired_at_utc"
    ))
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_lock).collect()
}

/// Record a heartbeat inside `tx` (committed together with its audit row).
/// Returns the updated lock, or `None` if the row is gone (released or
/// swept).
pub async fn lock_heartbeat_update(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    source: &str,
    progress_pct: Option<f64>,
    now: DateTime<Utc>,
) -> Result<Option<Lock>, StoreError> {
    let row = sqlx::query(&format!(
        r#"
        update locks
           set last_heartbeat_utc = $1,
               heartbeat_source = $2,
               reported_progress_pct = coalesce($3, reported_progress_pct)
         where id = $4
        returning {LOCK_COLUMNS}
        "#
    ))
    .bind(now)
    .bind(source)
    .bind(progress_pct)
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?;
    row.as_ref().map(row_to_lock).transpose()
}

/// Extend the absolute TTL inside `tx`. Returns the updated lock, or
/// `None` if gone.
pub async fn lock_extend(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    extension_s: i64,
) -> Result<Option<Lock>, StoreError> {
    let row = sqlx::query(&format!(
        r#"
        update locks
           set expires_at_utc = expires_at_utc + make_interval(secs => $1)
         where id = $2
        returning {LOCK_COLUMNS}
        "#
    ))
    .bind(extension_s as f64)
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?;
    row.as_ref().map(row_to_lock).transpose()
}

// ---------------------------------------------------------------------------
// Lock audit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NewLockAudit<'a> {
    pub lock_id: Uuid,
    pub branch: &'a str,
    pub scope: LockScope,
    pub resource_type: Option<&'a str>,
    pub resource_id: Option<&'a str>,
    pub holder: &'a str,
    /// `acquired | released | heartbeat | extended | expired | force_unlocked`
    pub action: &'a str,
    pub metadata: Value,
}

pub async fn lock_audit_insert(
    tx: &mut Transaction<'_, Postgres>,
    entry: &NewLockAudit<'_>,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        insert into lock_audit (lock_id, branch, scope, resource_type, resource_id, holder, action, metadata)
        values ($1,$2,$3,$4,$5,$6,$7,$8)
        "#,
    )
    .bind(entry.lock_id)
    .bind(entry.branch)
    .bind(entry.scope.as_str())
    .bind(entry.resource_type)
    .bind(entry.resource_id)
    .bind(entry.holder)
    .bind(entry.action)
    .bind(&entry.metadata)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
