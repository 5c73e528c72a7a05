//! Shadow-index rows.
//!
//! The partial unique index `uq_shadow_non_terminal` enforces the single
//! non-terminal shadow per `(branch, index_type)` at the store level; the
//! controller still checks first to produce a friendlier error.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use oms_schemas::{ShadowIndex, ShadowState};

use crate::{is_unique_constraint_violation, StoreError};

const SHADOW_COLUMNS: &str = "id, branch, index_type, resource_types, state, progress_pct, \
     estimated_completion_s, record_count, size_bytes, build_started_at_utc, \
     build_completed_at_utc, current_path, shadow_path";

fn row_to_shadow(row: &sqlx::postgres::PgRow) -> Result<ShadowIndex, StoreError> {
    let state_s: String = row.try_get("state")?;
    Ok(ShadowIndex {
        id: row.try_get("id")?,
        branch: row.try_get("branch")?,
        index_type: row.try_get("index_type")?,
        resource_types: row.try_get("resource_types")?,
        state: ShadowState::parse(&state_s).map_err(StoreError::Internal)?,
        progress_pct: row.try_get("progress_pct")?,
        estimated_completion_s: row.try_get("estimated_completion_s")?,
        record_count: row.try_get("record_count")?,
        size_bytes: row.try_get("size_bytes")?,
        build_started_at_utc: row.try_get("build_started_at_utc")?,
        build_completed_at_utc: row.try_get("build_completed_at_utc")?,
        current_path: row.try_get("current_path")?,
        shadow_path: row.try_get("shadow_path")?,
    })
}

/// Insert a new shadow row. A live non-terminal shadow for the same
/// `(branch, index_type)` fails with `Conflict`.
pub async fn shadow_insert(pool: &PgPool, shadow: &ShadowIndex) -> Result<(), StoreError> {
    let res = sqlx::query(
        r#"
        insert into shadow_indexes (
          id, branch, index_type, resource_types, state, progress_pct,
          estimated_completion_s, record_count, size_bytes,
          build_started_at_utc, build_completed_at_utc, current_path, shadow_path
        ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
        "#,
    )
    .bind(shadow.id)
    .bind(&shadow.branch)
    .bind(&shadow.index_type)
    .bind(&shadow.resource_types)
    .bind(shadow.state.as_str())
    .bind(shadow.progress_pct)
    .bind(shadow.estimated_completion_s)
    .bind(shadow.record_count)
    .bind(shadow.size_bytes)
    .bind(shadow.build_started_at_utc)
    .bind(shadow.build_completed_at_utc)
    .bind(&shadow.current_path)
    .bind(&shadow.shadow_path)
    .execute(pool)
    .await;

    match res {
        Ok(_) => Ok(()),
        Err(e) if is_unique_constraint_violation(&e, "uq_shadow_non_terminal") => {
            Err(StoreError::Conflict {
                detail: format!(
                    "a non-terminal shadow already exists for ({}, {})",
                    shadow.branch, shadow.index_type
                ),
                current_version: None,
            })
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn shadow_get(pool: &PgPool, id: Uuid) -> Result<ShadowIndex, StoreError> {
    let row = sqlx::query(&format!(
        "select {SHADOW_COLUMNS} from shadow_indexes where id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => row_to_shadow(&row),
        None => Err(StoreError::NotFound {
            what: format!("shadow index {id}"),
        }),
    }
}

/// The live non-terminal shadow for `(branch, index_type)`, if any.
pub async fn shadow_non_terminal_for(
    pool: &PgPool,
    branch: &str,
    index_type: &str,
) -> Result<Option<ShadowIndex>, StoreError> {
    let row = sqlx::query(&format!(
        r#"
        select {SHADOW_COLUMNS} from shadow_indexes
        where branch = $1 and index_type = $2
          and state in ('PREPARING','BUILDING','BUILT','SWITCHING')
        "#
    ))
    .bind(branch)
    .bind(index_type)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_shadow).transpose()
}

/// Guarded state transition: succeeds only from the expected state, so a
/// racing cancel and switch cannot both win.
pub async fn shadow_set_state(
    pool: &PgPool,
    id: Uuid,
    from: ShadowState,
    to: ShadowState,
) -> Result<bool, StoreError> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        update shadow_indexes
           set state = $1,
               build_completed_at_utc = case when $1 in ('BUILT','ACTIVE','FAILED','CANCELLED')
                                             then coalesce(build_completed_at_utc, now())
                                             else build_completed_at_utc end
         where id = $2 and state = $3
        returning id
        "#,
    )
    .bind(to.as_str())
    .bind(id)
    .bind(from.as_str())
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

pub async fn shadow_update_progress(
    pool: &PgPool,
    id: Uuid,
    progress_pct: f64,
    estimated_completion_s: Option<i64>,
    record_count: Option<i64>,
) -> Result<bool, StoreError> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        update shadow_indexes
           set progress_pct = $1,
               estimated_completion_s = $2,
               record_count = coalesce($3, record_count)
         where id = $4 and state = 'BUILDING'
        returning id
        "#,
    )
    .bind(progress_pct.clamp(0.0, 100.0))
    .bind(estimated_completion_s)
    .bind(record_count)
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

/// Record build results and move `BUILDING → BUILT`.
pub async fn shadow_complete_build(
    pool: &PgPool,
    id: Uuid,
    size_bytes: i64,
    record_count: i64,
    completed_at: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        update shadow_indexes
           set state = 'BUILT',
               progress_pct = 100,
               size_bytes = $1,
               record_count = $2,
               build_completed_at_utc = $3
         where id = $4 and state = 'BUILDING'
        returning id
        "#,
    )
    .bind(size_bytes)
    .bind(record_count)
    .bind(completed_at)
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}
