//! Changeset rows. Merged changesets are immutable: the only mutation is
//! the guarded state transition, and `merged` accepts no further writes.

use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use oms_schemas::{ChangeSet, ChangeSetState, EntityMutation};

use crate::StoreError;

/// Insert a changeset inside `tx` (committed with its audit record).
pub async fn changeset_insert(
    tx: &mut Transaction<'_, Postgres>,
    cs: &ChangeSet,
) -> Result<(), StoreError> {
    let mutations = serde_json::to_value(&cs.mutations)
        .map_err(|e| StoreError::Internal(format!("mutations encode: {e}")))?;
    let base_snapshot = serde_json::to_value(&cs.base_snapshot)
        .map_err(|e| StoreError::Internal(format!("base snapshot encode: {e}")))?;

    sqlx::query(
        r#"
        insert into changesets (
          id, source_branch, target_branch, state, base_commit, base_snapshot, mutations,
          created_at_utc, created_by, updated_at_utc, updated_by
        ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
        "#,
    )
    .bind(cs.id)
    .bind(&cs.source_branch)
    .bind(&cs.target_branch)
    .bind(cs.state.as_str())
    .bind(&cs.base_commit)
    .bind(&base_snapshot)
    .bind(&mutations)
    .bind(cs.created_at_utc)
    .bind(&cs.created_by)
    .bind(cs.updated_at_utc)
    .bind(&cs.updated_by)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn changeset_get(pool: &PgPool, id: Uuid) -> Result<ChangeSet, StoreError> {
    let row = sqlx::query(
        r#"
        select id, source_branch, target_branch, state, base_commit, base_snapshot, mutations,
               created_at_utc, created_by, updated_at_utc, updated_by
        from changesets
        where id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Err(StoreError::NotFound {
            what: format!("changeset {id}"),
        });
    };

    let state_s: String = row.try_get("state")?;
    let mutations_json: serde_json::Value = row.try_get("mutations")?;
    let mutations: Vec<EntityMutation> = serde_json::from_value(mutations_json)
        .map_err(|e| StoreError::Internal(format!("mutations decode: {e}")))?;
    let base_json: serde_json::Value = row.try_get("base_snapshot")?;
    let base_snapshot = serde_json::from_value(base_json)
        .map_err(|e| StoreError::Internal(format!("base snapshot decode: {e}")))?;

    Ok(ChangeSet {
        id: row.try_get("id")?,
        source_branch: row.try_get("source_branch")?,
        target_branch: row.try_get("target_branch")?,
        state: ChangeSetState::parse(&state_s).map_err(StoreError::Internal)?,
        base_commit: row.try_get("base_commit")?,
        base_snapshot,
        mutations,
        created_at_utc: row.try_get("created_at_utc")?,
        created_by: row.try_get("created_by")?,
        updated_at_utc: row.try_get("updated_at_utc")?,
        updated_by: row.try_get("updated_by")?,
    })
}

/// Guarded lifecycle transition inside `tx`. `merged` and `rejected` are
/// terminal; a transition out of them returns `false`.
pub async fn changeset_set_state(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    from: ChangeSetState,
    to: ChangeSetState,
    updated_by: &str,
) -> Result<bool, StoreError> {
    if from.is_terminal() {
        return Ok(false);
    }

    let row: Option<(Uuid,)> = sqlx::query_as(
        r#"
        update changesets
           set state = $1,
               updated_at_utc = now(),
               updated_by = $2
         where id = $3 and state = $4
        returning id
        "#,
    )
    .bind(to.as_str())
    .bind(updated_by)
    .bind(id)
    .bind(from.as_str())
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.is_some())
}
