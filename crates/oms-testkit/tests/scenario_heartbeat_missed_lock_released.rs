//! Heartbeat-missed auto-release: a lock whose holder stops heartbeating
//! is ignored by admission immediately after `3 × interval` and released
//! by the heartbeat sweeper with reason HEARTBEAT_MISSED.

use std::time::Duration;

use oms_config::CoreConfig;
use oms_locks::{AcquireRequest, ExpiryPath, LockManager};
use oms_schemas::{LockScope, LockType};

fn acquire_req(branch: &str) -> AcquireRequest {
    AcquireRequest {
        branch: branch.to_string(),
        scope: LockScope::ResourceType,
        resource_type: Some("object_type".to_string()),
        resource_id: None,
        lock_type: LockType::Indexing,
        holder: "crashy-indexer".to_string(),
        timeout: Duration::from_secs(5),
        ttl_s: 3600,
        heartbeat_interval_s: Some(1),
    }
}

#[tokio::test]
async fn missed_heartbeats_free_the_scope() -> anyhow::Result<()> {
    let Some(pool) = oms_testkit::db_pool().await? else {
        eprintln!("SKIP: OMS_DATABASE_URL not set");
        return Ok(());
    };

    let branch = oms_testkit::unique_branch("feature/hb");
    oms_testkit::seed_branch(&pool, &branch).await?;

    let cfg = CoreConfig::from_env()?;
    let manager = LockManager::new(pool.clone(), cfg.locks);

    let lock = manager
        .acquire_lock(acquire_req(&branch))
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    // Freshly acquired: admission refuses object_type writes.
    let check = manager
        .check_write_permission(&branch, "schema.write", Some("object_type"), None)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    assert!(!check.allowed);

    // No heartbeats arrive. After 3 × interval (+ margin) the lock is
    // expired and admission treats it as absent BEFORE any sweeper runs.
    tokio::time::sleep(Duration::from_secs(4)).await;
    let check = manager
        .check_write_permission(&branch, "schema.write", Some("object_type"), None)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    assert!(check.allowed, "expired lock must not block admission");

    // The sweeper releases it with HEARTBEAT_MISSED.
    let released = manager
        .sweep_expired(ExpiryPath::Heartbeat)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    assert!(released.iter().any(|l| l.id == lock.id), "sweeper released the lock");
    assert!(oms_db::lock_get(&pool, lock.id).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn heartbeats_keep_the_lock_alive() -> anyhow::Result<()> {
    let Some(pool) = oms_testkit::db_pool().await? else {
        eprintln!("SKIP: OMS_DATABASE_URL not set");
        return Ok(());
    };

    let branch = oms_testkit::unique_branch("feature/hb-alive");
    oms_testkit::seed_branch(&pool, &branch).await?;

    let cfg = CoreConfig::from_env()?;
    let manager = LockManager::new(pool.clone(), cfg.locks);

    let lock = manager
        .acquire_lock(acquire_req(&branch))
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(900)).await;
        manager
            .heartbeat(lock.id, "crashy-indexer", Some(40.0))
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?;
    }

    let released = manager
        .sweep_expired(ExpiryPath::Heartbeat)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    assert!(
        released.iter().all(|l| l.id != lock.id),
        "a heartbeating lock is never swept"
    );

    // Published progress overrides the gate's interpolation.
    let stored = oms_db::lock_get(&pool, lock.id).await?.expect("lock still held");
    assert_eq!(stored.reported_progress_pct, Some(40.0));

    Ok(())
}
