//! Schema-entity CRUD with optimistic concurrency.
//!
//! Entities are stored as JSONB rows keyed by `(branch, rid)`; `version`
//! is the optimistic token. A `Put` with `expected_version` that does not
//! match the stored row fails with `Conflict` carrying the current version
//! so the caller can re-read and retry.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use oms_schemas::{EntityKind, SchemaEntity};

use crate::{is_unique_constraint_violation, StoreError};

/// Outcome of a successful put.
#[derive(Debug, Clone)]
pub struct PutOutcome {
    pub rid: Uuid,
    /// Version after the write.
    pub version: i64,
    pub created: bool,
}

/// A stored entity row.
#[derive(Debug, Clone)]
pub struct EntityRow {
    pub branch: String,
    pub rid: Uuid,
    pub kind: EntityKind,
    pub api_name: String,
    pub version: i64,
    pub entity: SchemaEntity,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

fn row_to_entity(row: &sqlx::postgres::PgRow) -> Result<EntityRow, StoreError> {
    let kind_s: String = row.try_get("kind").map_err(StoreError::from)?;
    let entity_json: serde_json::Value = row.try_get("entity").map_err(StoreError::from)?;
    let entity: SchemaEntity = serde_json::from_value(entity_json)
        .map_err(|e| StoreError::Internal(format!("entity row decode: {e}")))?;
    Ok(EntityRow {
        branch: row.try_get("branch").map_err(StoreError::from)?,
        rid: row.try_get("rid").map_err(StoreError::from)?,
        kind: EntityKind::parse(&kind_s).map_err(StoreError::Internal)?,
        api_name: row.try_get("api_name").map_err(StoreError::from)?,
        version: row.try_get("version").map_err(StoreError::from)?,
        entity,
        created_at_utc: row.try_get("created_at_utc").map_err(StoreError::from)?,
        updated_at_utc: row.try_get("updated_at_utc").map_err(StoreError::from)?,
    })
}

/// Fetch one entity by rid.
pub async fn entity_get(
    pool: &PgPool,
    branch: &str,
    rid: Uuid,
) -> Result<EntityRow, StoreError> {
    let row = sqlx::query(
        r#"
        select branch, rid, kind, api_name, version, entity, created_at_utc, updated_at_utc
        from schema_entities
        where branch = $1 and rid = $2
        "#,
    )
    .bind(branch)
    .bind(rid)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => row_to_entity(&row),
        None => Err(StoreError::NotFound {
            what: format!("entity {rid} on {branch}"),
        }),
    }
}

/// Insert or update one entity inside `tx`.
///
/// - `expected_version = None`: insert; an existing rid or a duplicate
///   `(kind, api_name)` fails with `Conflict`.
/// - `expected_version = Some(v)`: update; a stored version other than `v`
///   fails with `Conflict { current_version }`.
pub async fn entity_put(
    tx: &mut Transaction<'_, Postgres>,
    branch: &str,
    entity: &SchemaEntity,
    expected_version: Option<i64>,
) -> Result<PutOutcome, StoreError> {
    let rid = entity.rid();
    let kind = entity.kind();
    let api_name = entity.api_name().to_string();
    let entity_json = serde_json::to_value(entity)
        .map_err(|e| StoreError::Internal(format!("entity encode: {e}")))?;

    match expected_version {
        None => {
            let res = sqlx::query(
                r#"
                insert into schema_entities (branch, rid, kind, api_name, version, entity)
                values ($1, $2, $3, $4, 1, $5)
                "#,
            )
            .bind(branch)
            .bind(rid)
            .bind(kind.as_str())
            .bind(&api_name)
            .bind(&entity_json)
            .execute(&mut **tx)
            .await;

            match res {
                Ok(_) => Ok(PutOutcome {
                    rid,
                    version: 1,
                    created: true,
                }),
                Err(e) if is_unique_constraint_violation(&e, "uq_entities_api_name") => {
                    Err(StoreError::Conflict {
                        detail: format!("api_name '{api_name}' already used for {}", kind.as_str()),
                        current_version: None,
                    })
                }
                Err(e) => Err(e.into()),
            }
        }
        Some(v) => {
            let row = sqlx::query(
                r#"
                update schema_entities
                   set entity = $1,
                       api_name = $2,
                       version = version + 1,
                       updated_at_utc = now()
                 where branch = $3 and rid = $4 and version = $5
                returning version
                "#,
            )
            .bind(&entity_json)
            .bind(&api_name)
            .bind(branch)
            .bind(rid)
            .bind(v)
            .fetch_optional(&mut **tx)
            .await?;

            match row {
                Some(row) => Ok(PutOutcome {
                    rid,
                    version: row.try_get("version")?,
                    created: false,
                }),
                None => {
                    // Distinguish stale version from missing row.
                    let current: Option<(i64,)> = sqlx::query_as(
                        "select version from schema_entities where branch = $1 and rid = $2",
                    )
                    .bind(branch)
                    .bind(rid)
                    .fetch_optional(&mut **tx)
                    .await?;

                    match current {
                        Some((cv,)) => Err(StoreError::Conflict {
                            detail: format!("expected version {v}"),
                            current_version: Some(cv),
                        }),
                        None => Err(StoreError::NotFound {
                            what: format!("entity {rid} on {branch}"),
                        }),
                    }
                }
            }
        }
    }
}

/// Delete one entity with an expected version.
///
/// Deletion is forbidden while other entities reference the rid, unless
/// `cascade` is set (the caller is responsible for deleting referencers in
/// the same transaction).
pub async fn entity_delete(
    tx: &mut Transaction<'_, Postgres>,
    branch: &str,
    rid: Uuid,
    expected_version: i64,
    cascade: bool,
) -> Result<(), StoreError> {
    if !cascade {
        let referencers = entity_referencers_tx(tx, branch, rid).await?;
        if !referencers.is_empty() {
            return Err(StoreError::Conflict {
                detail: format!(
                    "entity {rid} is referenced by {} other entities; pass cascade to delete",
                    referencers.len()
                ),
                current_version: None,
            });
        }
    }

    let res = sqlx::query(
        r#"
        delete from schema_entities
        where branch = $1 and rid = $2 and version = $3
        "#,
    )
    .bind(branch)
    .bind(rid)
    .bind(expected_version)
    .execute(&mut **tx)
    .await?;

    if res.rows_affected() == 0 {
        let current: Option<(i64,)> =
            sqlx::query_as("select version from schema_entities where branch = $1 and rid = $2")
                .bind(branch)
                .bind(rid)
                .fetch_optional(&mut **tx)
                .await?;
        return match current {
            Some((cv,)) => Err(StoreError::Conflict {
                detail: format!("expected version {expected_version}"),
                current_version: Some(cv),
            }),
            None => Err(StoreError::NotFound {
                what: format!("entity {rid} on {branch}"),
            }),
        };
    }

    Ok(())
}

/// Rids of entities on `branch` that reference `rid` (link endpoints,
/// property owners, interface implementations).
pub async fn entity_referencers(
    pool: &PgPool,
    branch: &str,
    rid: Uuid,
) -> Result<Vec<Uuid>, StoreError> {
    referencers_query(pool, branch, rid).await
}

async fn entity_referencers_tx(
    tx: &mut Transaction<'_, Postgres>,
    branch: &str,
    rid: Uuid,
) -> Result<Vec<Uuid>, StoreError> {
    referencers_query(&mut **tx, branch, rid).await
}

async fn referencers_query<'e, E>(exec: E, branch: &str, rid: Uuid) -> Result<Vec<Uuid>, StoreError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let rid_s = rid.to_string();
    let rows = sqlx::query(
        r#"
        select rid from schema_entities
        where branch = $1
          and rid <> $2
          and (entity->>'object_rid' = $3
               or entity->>'source_rid' = $3
               or entity->>'target_rid' = $3
               or entity->'implements' ? $3)
        "#,
    )
    .bind(branch)
    .bind(rid)
    .bind(&rid_s)
    .fetch_all(exec)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(row.try_get("rid")?);
    }
    Ok(out)
}

/// All entities of one kind on a branch, ordered by api_name.
pub async fn entity_list_kind(
    pool: &PgPool,
    branch: &str,
    kind: EntityKind,
) -> Result<Vec<EntityRow>, StoreError> {
    let rows = sqlx::query(
        r#"
        select branch, rid, kind, api_name, version, entity, created_at_utc, updated_at_utc
        from schema_entities
        where branch = $1 and kind = $2
        order by api_name asc
        "#,
    )
    .bind(branch)
    .bind(kind.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_entity).collect()
}

/// Every entity on a branch. Used by the merge engine to materialize a
/// branch snapshot.
pub async fn entity_list_branch(pool: &PgPool, branch: &str) -> Result<Vec<EntityRow>, StoreError> {
    let rows = sqlx::query(
        r#"
        select branch, rid, kind, api_name, version, entity, created_at_utc, updated_at_utc
        from schema_entities
        where branch = $1
        order by kind, api_name
        "#,
    )
    .bind(branch)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_entity).collect()
}
