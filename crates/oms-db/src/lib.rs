//! Persistent store gateway.
//!
//! Every other component talks to Postgres through this crate. It owns the
//! pool, embedded migrations, the advisory-lock primitive, and the
//! transactional write discipline: business change, outbox row, and audit
//! row commit atomically or not at all.
//!
//! Raw SQL with `sqlx::query` + `try_get` row mapping throughout; no ORM.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};
use std::time::Duration;

pub const ENV_DB_URL: &str = "OMS_DATABASE_URL";

pub mod audit;
pub mod branches;
pub mod changesets;
pub mod entities;
pub mod locks;
pub mod outbox;
pub mod shadow;

pub use audit::{audit_insert, audit_list_recent, audit_list_unprojected};
pub use branches::{branch_create, branch_get, branch_list, branch_set_state, branch_touch};
pub use changesets::{changeset_get, changeset_insert, changeset_set_state};
pub use entities::{
    entity_delete, entity_get, entity_list_branch, entity_list_kind, entity_put,
    entity_referencers, PutOutcome,
};
pub use locks::{
    lock_audit_insert, lock_delete, lock_extend, lock_get, lock_heartbeat_update, lock_insert,
    locks_active_for_branch, locks_all, NewLockAudit,
};
pub use outbox::{
    consumer_mark_processed, consumer_mark_processed_tx, dead_letter_insert, dead_letters_count,
    outbox_claim_batch, outbox_get_by_event_id, outbox_insert, outbox_mark_failed,
    outbox_mark_published, outbox_release_claim, outbox_stats, OutboxStats,
};
pub use shadow::{
    shadow_complete_build, shadow_get, shadow_insert, shadow_non_terminal_for,
    shadow_set_state, shadow_update_progress,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Store-level failures callers are expected to match on.
///
/// Transient kinds (`Unavailable`, `Timeout`) are retryable by the caller;
/// `Conflict` carries the current version so the caller can retry with it.
#[derive(Debug)]
pub enum StoreError {
    /// Optimistic version mismatch or uniqueness violation.
    Conflict {
        detail: String,
        current_version: Option<i64>,
    },
    NotFound {
        what: String,
    },
    /// Advisory lock not acquired within the timeout.
    Timeout,
    /// Transient store failure; retryable.
    Unavailable(String),
    Internal(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Conflict { detail, current_version } => match current_version {
                Some(v) => write!(f, "conflict: {detail} (current version {v})"),
                None => write!(f, "conflict: {detail}"),
            },
            StoreError::NotFound { what } => write!(f, "not found: {what}"),
            StoreError::Timeout => write!(f, "store timeout"),
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
            StoreError::Internal(msg) => write!(f, "store internal error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => StoreError::NotFound {
                what: "row".to_string(),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                StoreError::Unavailable(e.to_string())
            }
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // lock_not_available (advisory lock timeout under SET LOCAL lock_timeout)
                Some("55P03") => StoreError::Timeout,
                // serialization_failure / deadlock_detected: retryable conflict
                Some("40001") | Some("40P01") => StoreError::Conflict {
                    detail: db.message().to_string(),
                    current_version: None,
                },
                // unique_violation
                Some("23505") => StoreError::Conflict {
                    detail: db.message().to_string(),
                    current_version: None,
                },
                _ => StoreError::Internal(e.to_string()),
            },
            _ => StoreError::Internal(e.to_string()),
        }
    }
}

/// Detect a Postgres unique constraint violation by name.
pub(crate) fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.constraint() == Some(constraint)
                || (db_err.code().as_deref() == Some("23505")
                    && db_err.constraint() == Some(constraint))
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Pool / migrations
// ---------------------------------------------------------------------------

/// Connect to Postgres using OMS_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Test helper used by integration tests:
/// - Connect using OMS_DATABASE_URL
/// - Ensure migrations are applied
pub async fn testkit_db_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='branch_states'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_core_schema: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_core_schema: bool,
}

// ---------------------------------------------------------------------------
// Transactions / advisory locks
// ---------------------------------------------------------------------------

/// Begin a write transaction. Callers follow the discipline:
/// `begin → advisory_lock(branch) → read-current → write-with-expected-version
/// → outbox_insert → audit_insert → commit`.
pub async fn begin(pool: &PgPool) -> Result<Transaction<'static, Postgres>, StoreError> {
    Ok(pool.begin().await?)
}

/// Derive the 64-bit advisory-lock key from arbitrary key bytes.
///
/// First 8 bytes of SHA-256, big-endian. Stable across processes so every
/// writer hashing the same `(branch)` key contends on the same lock.
pub fn advisory_key(key_bytes: &[u8]) -> i64 {
    let digest = Sha256::digest(key_bytes);
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(buf)
}

/// Transaction-scoped exclusive advisory lock, released automatically on
/// commit or rollback.
///
/// `SET LOCAL lock_timeout` bounds the wait; exceeding it surfaces as
/// [`StoreError::Timeout`].
pub async fn advisory_lock(
    tx: &mut Transaction<'_, Postgres>,
    key_bytes: &[u8],
    timeout: Duration,
) -> Result<(), StoreError> {
    let millis = timeout.as_millis().max(1);
    // lock_timeout cannot be bound as a parameter; the value is numeric and
    // locally derived, not user input.
    sqlx::query(&format!("set local lock_timeout = '{millis}ms'"))
        .execute(&mut **tx)
        .await?;

    sqlx::query("select pg_advisory_xact_lock($1)")
        .bind(advisory_key(key_bytes))
        .execute(&mut **tx)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advisory_key_is_stable_and_distinct() {
        let a = advisory_key(b"branch:feature/x");
        let b = advisory_key(b"branch:feature/x");
        let c = advisory_key(b"branch:feature/y");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn store_error_display_carries_version() {
        let e = StoreError::Conflict {
            detail: "version mismatch".to_string(),
            current_version: Some(7),
        };
        let s = e.to_string();
        assert!(s.contains("version mismatch"));
        assert!(s.contains('7'));
    }
}
