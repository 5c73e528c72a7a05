//! Shared helpers for the scenario tests.
//!
//! DB-backed scenarios connect through [`db_pool`] and skip when
//! `OMS_DATABASE_URL` is unset (local + CI friendly); entity builders cut
//! the boilerplate out of merge and gate scenarios.

use anyhow::Result;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use oms_schemas::{
    BaseType, Cardinality, EntityHeader, EntityStatus, LinkTypeSpec, ObjectTypeSpec,
    PropertyConstraints, PropertySpec, SchemaEntity, Visibility,
};

pub use oms_outbox::InMemoryTransport;

/// Connect + migrate, or `None` when no database is configured.
///
/// Callers follow the same skip pattern:
/// ```ignore
/// let Some(pool) = oms_testkit::db_pool().await? else {
///     eprintln!("SKIP: OMS_DATABASE_URL not set");
///     return Ok(());
/// };
/// ```
pub async fn db_pool() -> Result<Option<PgPool>> {
    if std::env::var(oms_db::ENV_DB_URL).is_err() {
        return Ok(None);
    }
    let pool = oms_db::testkit_db_pool().await?;
    Ok(Some(pool))
}

/// A unique branch name per test run so scenarios never collide.
pub fn unique_branch(prefix: &str) -> String {
    format!("{prefix}-{}", &Uuid::new_v4().to_string()[..8])
}

pub async fn seed_branch(pool: &PgPool, name: &str) -> Result<()> {
    let mut tx = oms_db::begin(pool)
        .await
        .map_err(|e| anyhow::anyhow!("seed branch begin: {e}"))?;
    oms_db::branch_create(&mut tx, name, "testkit")
        .await
        .map_err(|e| anyhow::anyhow!("seed branch: {e}"))?;
    tx.commit().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Entity builders
// ---------------------------------------------------------------------------

pub fn header(api_name: &str) -> EntityHeader {
    EntityHeader {
        rid: Uuid::new_v4(),
        api_name: api_name.to_string(),
        display_name: api_name.to_string(),
        status: EntityStatus::Active,
        visibility: Visibility::Normal,
        created_at_utc: Utc::now(),
        created_by: "testkit".to_string(),
        updated_at_utc: Utc::now(),
        updated_by: "testkit".to_string(),
    }
}

pub fn object_type(api_name: &str) -> SchemaEntity {
    SchemaEntity::ObjectType(ObjectTypeSpec {
        header: header(api_name),
        implements: vec![],
        description: None,
    })
}

pub fn property(api_name: &str, object_rid: Uuid, base_type: BaseType) -> SchemaEntity {
    SchemaEntity::Property(PropertySpec {
        header: header(api_name),
        object_rid,
        base_type,
        value_format: None,
        constraints: PropertyConstraints::default(),
    })
}

pub fn link_type(api_name: &str, source: Uuid, target: Uuid) -> SchemaEntity {
    SchemaEntity::LinkType(LinkTypeSpec {
        header: header(api_name),
        source_rid: source,
        target_rid: target,
        cardinality: Cardinality::OneToMany,
    })
}
