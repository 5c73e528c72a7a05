//! Background sweepers.
//!
//! Two independent tasks service the two expiry paths: the TTL sweeper at
//! a slow cadence and the heartbeat sweeper at a fast one. Both read their
//! cadence from `LockConfig` and stop when the cancellation token flips.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::manager::{ExpiryPath, LockManager};

/// Spawn the TTL sweeper (`LOCK_SWEEP_TTL_S` cadence, ~5 min default).
pub fn spawn_ttl_sweeper(
    manager: LockManager,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let period = Duration::from_secs(manager.config().sweep_ttl_s.max(1) as u64);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sweep_once(&manager, ExpiryPath::Ttl).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("ttl sweeper stopping");
                        return;
                    }
                }
            }
        }
    })
}

/// Spawn the heartbeat sweeper (`LOCK_SWEEP_HEARTBEAT_S` cadence, ~30 s
/// default).
pub fn spawn_heartbeat_sweeper(
    manager: LockManager,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let period = Duration::from_secs(manager.config().sweep_heartbeat_s.max(1) as u64);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sweep_once(&manager, ExpiryPath::Heartbeat).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("heartbeat sweeper stopping");
                        return;
                    }
                }
            }
        }
    })
}

async fn sweep_once(manager: &LockManager, path: ExpiryPath) {
    match manager.sweep_expired(path).await {
        Ok(released) if !released.is_empty() => {
            for lock in &released {
                info!(
                    lock_id = %lock.id,
                    branch = %lock.branch,
                    path = ?path,
                    "sweeper released expired lock"
                );
            }
        }
        Ok(_) => {}
        Err(e) => warn!(path = ?path, error = %e, "lock sweep failed"),
    }
}
