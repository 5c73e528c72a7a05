//! Branch state rows.
//!
//! `version` increments on every persisted mutation; state transitions are
//! validated by the lock manager before they reach these queries.

use sqlx::{PgPool, Postgres, Row, Transaction};

use oms_schemas::{Branch, BranchState};

use crate::StoreError;

fn row_to_branch(row: &sqlx::postgres::PgRow) -> Result<Branch, StoreError> {
    let state_s: String = row.try_get("state")?;
    Ok(Branch {
        name: row.try_get("branch_name")?,
        state: BranchState::parse(&state_s).map_err(StoreError::Internal)?,
        head_commit: row.try_get("head_commit")?,
        updated_at_utc: row.try_get("updated_at_utc")?,
        updated_by: row.try_get("updated_by")?,
        version: row.try_get("version")?,
    })
}

/// Create a branch in ACTIVE state inside `tx`, so the row commits with
/// its outbox event and audit record. An existing name fails with
/// `Conflict`.
pub async fn branch_create(
    tx: &mut Transaction<'_, Postgres>,
    name: &str,
    created_by: &str,
) -> Result<Branch, StoreError> {
    let row = sqlx::query(
        r#"
        insert into branch_states (branch_name, state, updated_by)
        values ($1, 'ACTIVE', $2)
        on conflict (branch_name) do nothing
        returning branch_name, state, head_commit, version, updated_at_utc, updated_by
        "#,
    )
    .bind(name)
    .bind(created_by)
    .fetch_optional(&mut **tx)
    .await?;

    match row {
        Some(row) => row_to_branch(&row),
        None => Err(StoreError::Conflict {
            detail: format!("branch '{name}' already exists"),
            current_version: None,
        }),
    }
}

pub async fn branch_get(pool: &PgPool, name: &str) -> Result<Branch, StoreError> {
    let row = sqlx::query(
        r#"
        select branch_name, state, head_commit, version, updated_at_utc, updated_by
        from branch_states
        where branch_name = $1
        "#,
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => row_to_branch(&row),
        None => Err(StoreError::NotFound {
            what: format!("branch '{name}'"),
        }),
    }
}

pub async fn branch_list(pool: &PgPool) -> Result<Vec<Branch>, StoreError> {
    let rows = sqlx::query(
        r#"
        select branch_name, state, head_commit, version, updated_at_utc, updated_by
        from branch_states
        order by branch_name asc
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_branch).collect()
}

/// Transition a branch's state with optimistic concurrency.
///
/// Fails with `Conflict { current_version }` if the stored version moved.
pub async fn branch_set_state(
    tx: &mut Transaction<'_, Postgres>,
    name: &str,
    state: BranchState,
    expected_version: i64,
    updated_by: &str,
) -> Result<i64, StoreError> {
    let row = sqlx::query(
        r#"
        update branch_states
           set state = $1,
               version = version + 1,
               updated_at_utc = now(),
               updated_by = $2
         where branch_name = $3 and version = $4
        returning version
        "#,
    )
    .bind(state.as_str())
    .bind(updated_by)
    .bind(name)
    .bind(expected_version)
    .fetch_optional(&mut **tx)
    .await?;

    match row {
        Some(row) => Ok(row.try_get("version")?),
        None => {
            let current: Option<(i64,)> =
                sqlx::query_as("select version from branch_states where branch_name = $1")
                    .bind(name)
                    .fetch_optional(&mut **tx)
                    .await?;
            match current {
                Some((cv,)) => Err(StoreError::Conflict {
                    detail: format!("expected branch version {expected_version}"),
                    current_version: Some(cv),
                }),
                None => Err(StoreError::NotFound {
                    what: format!("branch '{name}'"),
                }),
            }
        }
    }
}

/// Bump the branch version after an entity mutation, optionally moving the
/// head commit. Runs inside the same transaction as the mutation.
pub async fn branch_touch(
    tx: &mut Transaction<'_, Postgres>,
    name: &str,
    head_commit: Option<&str>,
    updated_by: &str,
) -> Result<i64, StoreError> {
    let row = sqlx::query(
        r#"
        update branch_states
           set version = version + 1,
               head_commit = coalesce($1, head_commit),
               updated_at_utc = now(),
               updated_by = $2
         where branch_name = $3
        returning version
        "#,
    )
    .bind(head_commit)
    .bind(updated_by)
    .bind(name)
    .fetch_optional(&mut **tx)
    .await?;

    match row {
        Some(row) => Ok(row.try_get("version")?),
        None => Err(StoreError::NotFound {
            what: format!("branch '{name}'"),
        }),
    }
}
