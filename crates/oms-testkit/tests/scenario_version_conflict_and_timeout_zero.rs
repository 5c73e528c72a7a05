//! Optimistic-concurrency and immediate-refusal boundaries: a stale
//! `expected_version` fails with the current version attached, and an
//! acquire with `timeout = 0` against an existing conflict returns
//! CONFLICT without waiting.

use std::time::Duration;

use oms_config::CoreConfig;
use oms_db::StoreError;
use oms_locks::{AcquireRequest, LockError, LockManager};
use oms_schemas::{LockScope, LockType, SchemaEntity};

#[tokio::test]
async fn stale_version_conflict_carries_current_version() -> anyhow::Result<()> {
    let Some(pool) = oms_testkit::db_pool().await? else {
        eprintln!("SKIP: OMS_DATABASE_URL not set");
        return Ok(());
    };

    let branch = oms_testkit::unique_branch("feature/occ");
    oms_testkit::seed_branch(&pool, &branch).await?;

    let user = oms_testkit::object_type("User");
    let mut tx = oms_db::begin(&pool).await?;
    oms_db::entity_put(&mut tx, &branch, &user, None).await?;
    tx.commit().await?;

    // Writer A updates at version 1 → version becomes 2.
    let mut edited = user.clone();
    if let SchemaEntity::ObjectType(o) = &mut edited {
        o.description = Some("writer A".to_string());
    }
    let mut tx = oms_db::begin(&pool).await?;
    let outcome = oms_db::entity_put(&mut tx, &branch, &edited, Some(1)).await?;
    tx.commit().await?;
    assert_eq!(outcome.version, 2);

    // Writer B retries with the stale version 1 and loses.
    let mut tx = oms_db::begin(&pool).await?;
    let err = oms_db::entity_put(&mut tx, &branch, &edited, Some(1))
        .await
        .unwrap_err();
    match err {
        StoreError::Conflict { current_version, .. } => {
            assert_eq!(current_version, Some(2), "conflict surfaces the current version");
        }
        other => panic!("expected Conflict, got {other}"),
    }

    // Round trip: Get returns what Put stored, modulo server bookkeeping.
    let row = oms_db::entity_get(&pool, &branch, user.rid()).await?;
    assert_eq!(row.entity.api_name(), "User");
    assert_eq!(row.version, 2);

    Ok(())
}

#[tokio::test]
async fn acquire_with_timeout_zero_refuses_immediately() -> anyhow::Result<()> {
    let Some(pool) = oms_testkit::db_pool().await? else {
        eprintln!("SKIP: OMS_DATABASE_URL not set");
        return Ok(());
    };

    let branch = oms_testkit::unique_branch("feature/t0");
    oms_testkit::seed_branch(&pool, &branch).await?;

    let cfg = CoreConfig::from_env()?;
    let manager = LockManager::new(pool.clone(), cfg.locks);

    let req = |holder: &str, timeout: Duration| AcquireRequest {
        branch: branch.clone(),
        scope: LockScope::ResourceType,
        resource_type: Some("object_type".to_string()),
        resource_id: None,
        lock_type: LockType::Indexing,
        holder: holder.to_string(),
        timeout,
        ttl_s: 600,
        heartbeat_interval_s: None,
    };

    manager
        .acquire_lock(req("holder-1", Duration::from_secs(5)))
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let started = std::time::Instant::now();
    let err = manager
        .acquire_lock(req("holder-2", Duration::ZERO))
        .await
        .unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(1), "no waiting on timeout=0");
    match err {
        LockError::Conflict(info) => assert_eq!(info.holder, "holder-1"),
        other => panic!("expected Conflict, got {other}"),
    }

    Ok(())
}
