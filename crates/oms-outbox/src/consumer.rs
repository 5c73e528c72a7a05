//! Idempotent consumption.
//!
//! Delivery is at-least-once, so every consumer runs its side effects
//! through [`process_deduped`]: the `(consumer_name, event_id)` row in
//! `event_consumer_tracking` is claimed first, and redeliveries skip the
//! handler entirely.

use std::future::Future;

use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

/// Run `handler` at most once per `(consumer_name, event_id)`.
///
/// Returns `Ok(true)` when the handler ran, `Ok(false)` on a deduplicated
/// redelivery. A handler error does NOT unclaim the event: at-most-once
/// side effects take priority, and the failed handling is the consumer's
/// to retry out-of-band.
pub async fn process_deduped<F, Fut>(
    pool: &PgPool,
    consumer_name: &str,
    event_id: Uuid,
    handler: F,
) -> anyhow::Result<bool>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let first_delivery = oms_db::consumer_mark_processed(pool, consumer_name, event_id).await?;
    if !first_delivery {
        debug!(consumer = consumer_name, event_id = %event_id, "duplicate delivery skipped");
        return Ok(false);
    }

    handler().await?;
    Ok(true)
}
