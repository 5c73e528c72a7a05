//! The outbox dispatcher.
//!
//! Long-running worker: claim a batch (`pending`, plus `failed` rows whose
//! retry time arrived), publish each envelope on every configured
//! transport, and record the outcome:
//!
//! - all transports ACK → `published`;
//! - any failure → `failed`, retry_count+1, next retry at
//!   `now + backoff(retry_count)` (exponential, jittered, capped);
//! - retries exhausted or the event older than `max_event_age_s` → routed
//!   to the dead-letter store exactly once.
//!
//! Delivery is at-least-once by construction: a crash after transport ACK
//! but before the row update republishes on restart, and consumers
//! deduplicate by `event.id`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{info, warn};

use oms_config::OutboxConfig;
use oms_schemas::OutboxRecord;

use crate::transport::Transport;

#[derive(Clone)]
pub struct Dispatcher {
    pool: PgPool,
    transports: Vec<Arc<dyn Transport>>,
    cfg: OutboxConfig,
    batch_size: i64,
}

/// Outcome counters for one dispatch pass; surfaced in status endpoints
/// and test assertions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub published: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

impl Dispatcher {
    pub fn new(pool: PgPool, transports: Vec<Arc<dyn Transport>>, cfg: OutboxConfig) -> Self {
        Self {
            pool,
            transports,
            cfg,
            batch_size: 32,
        }
    }

    /// One claim-publish-record pass. Returns what happened so callers
    /// (and tests) can assert on it.
    pub async fn dispatch_once(&self) -> anyhow::Result<DispatchOutcome> {
        let now = Utc::now();
        let batch = oms_db::outbox_claim_batch(&self.pool, self.batch_size, now).await?;
        let mut outcome = DispatchOutcome::default();

        for record in batch {
            // Age check first: an event past max_event_age_s goes straight
            // to the DLQ rather than consuming another delivery attempt.
            let age_s = (now - record.created_at_utc).num_seconds();
            if age_s > self.cfg.max_event_age_s {
                self.dead_letter(&record, &format!("event age {age_s}s exceeds limit"))
                    .await?;
                outcome.dead_lettered += 1;
                continue;
            }

            match self.publish_all(&record).await {
                Ok(()) => {
                    oms_db::outbox_mark_published(&self.pool, record.id).await?;
                    outcome.published += 1;
                }
                Err(e) => {
                    let next_retry = Utc::now()
                        + chrono::Duration::milliseconds(
                            backoff_ms(&self.cfg, record.retry_count + 1),
                        );
                    let retries =
                        oms_db::outbox_mark_failed(&self.pool, record.id, Some(next_retry)).await?;

                    if retries >= record.max_retries {
                        self.dead_letter(&record, &format!("{e:#}")).await?;
                        outcome.dead_lettered += 1;
                    } else {
                        warn!(
                            event_id = %record.event_id,
                            retry = retries,
                            "publish failed; will retry"
                        );
                        outcome.retried += 1;
                    }
                }
            }
        }

        Ok(outcome)
    }

    async fn publish_all(&self, record: &OutboxRecord) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(&record.payload)?;
        for transport in &self.transports {
            transport
                .publish(&record.subject, payload.clone())
                .await
                .map_err(|e| e.context(format!("transport {}", transport.name())))?;
        }
        Ok(())
    }

    async fn dead_letter(&self, record: &OutboxRecord, last_error: &str) -> anyhow::Result<()> {
        // ON CONFLICT (event_id) makes this exactly-once even if a crash
        // lands the same exhausted record here twice.
        let created = oms_db::dead_letter_insert(&self.pool, record, last_error).await?;
        if created {
            warn!(event_id = %record.event_id, error = %last_error, "event dead-lettered");
        }
        Ok(())
    }
}

/// Exponential backoff with jitter: `base * 2^(retry-1) + jitter(0..base)`,
/// capped at `backoff_max_ms`.
pub fn backoff_ms(cfg: &OutboxConfig, retry: i32) -> i64 {
    let exp = (retry - 1).clamp(0, 16) as u32;
    let raw = cfg.backoff_base_ms.saturating_mul(1i64 << exp);
    let jitter = rand::thread_rng().gen_range(0..cfg.backoff_base_ms.max(1));
    (raw + jitter).min(cfg.backoff_max_ms)
}

/// Spawn the dispatcher loop. Polls at `poll_interval`; stops when the
/// shutdown token flips.
pub fn spawn_dispatcher(
    dispatcher: Dispatcher,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match dispatcher.dispatch_once().await {
                        Ok(outcome) if outcome != DispatchOutcome::default() => {
                            info!(
                                published = outcome.published,
                                retried = outcome.retried,
                                dead_lettered = outcome.dead_lettered,
                                "outbox dispatch pass"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %format!("{e:#}"), "outbox dispatch pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("outbox dispatcher stopping");
                        return;
                    }
                }
            }
        }
    })
}
