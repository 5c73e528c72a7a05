//! Dispatcher retry semantics: failures back off and retry; exhausting
//! `max_retries` routes the record to the dead-letter store exactly once.

use std::sync::Arc;

use oms_config::OutboxConfig;
use oms_db::outbox::NewOutboxEvent;
use oms_outbox::{Dispatcher, InMemoryTransport, Transport};
use serde_json::json;
use uuid::Uuid;

fn fast_cfg() -> OutboxConfig {
    OutboxConfig {
        max_retries: 3,
        max_event_age_s: 3600,
        // Tiny backoff so retries are immediately eligible in the test.
        backoff_base_ms: 1,
        backoff_max_ms: 2,
    }
}

async fn insert_event(pool: &sqlx::PgPool) -> anyhow::Result<Uuid> {
    let ev = NewOutboxEvent {
        event_id: Uuid::new_v4(),
        event_type: "com.oms.schema.created".to_string(),
        subject: "schema.created".to_string(),
        correlation_id: Uuid::new_v4(),
        idempotency_key: Some(format!("dlq-{}", Uuid::new_v4())),
        data: json!({"specversion": "1.0", "id": Uuid::new_v4()}),
        max_retries: 3,
    };
    let mut tx = oms_db::begin(pool).await?;
    oms_db::outbox_insert(&mut tx, &ev).await?;
    tx.commit().await?;
    Ok(ev.event_id)
}

#[tokio::test]
async fn happy_path_publishes_once() -> anyhow::Result<()> {
    let Some(pool) = oms_testkit::db_pool().await? else {
        eprintln!("SKIP: OMS_DATABASE_URL not set");
        return Ok(());
    };

    let event_id = insert_event(&pool).await?;
    let transport = InMemoryTransport::new();
    let dispatcher = Dispatcher::new(
        pool.clone(),
        vec![Arc::new(transport.clone()) as Arc<dyn Transport>],
        fast_cfg(),
    );

    // Drain until our event publishes (other tests' rows may share the
    // table).
    for _ in 0..10 {
        dispatcher.dispatch_once().await?;
        let rec = oms_db::outbox_get_by_event_id(&pool, event_id).await?.unwrap();
        if rec.status == oms_schemas::OutboxStatus::Published {
            assert!(rec.published_at_utc.is_some());
            return Ok(());
        }
    }
    panic!("event never published");
}

#[tokio::test]
async fn exhausted_retries_dead_letter_exactly_once() -> anyhow::Result<()> {
    let Some(pool) = oms_testkit::db_pool().await? else {
        eprintln!("SKIP: OMS_DATABASE_URL not set");
        return Ok(());
    };

    let event_id = insert_event(&pool).await?;
    let transport = InMemoryTransport::new();
    transport.fail_next(usize::MAX);
    let dispatcher = Dispatcher::new(
        pool.clone(),
        vec![Arc::new(transport.clone()) as Arc<dyn Transport>],
        fast_cfg(),
    );

    // Attempt 1..=3 fail; the third exhausts max_retries and dead-letters.
    for _ in 0..8 {
        dispatcher.dispatch_once().await?;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let rec = oms_db::outbox_get_by_event_id(&pool, event_id).await?.unwrap();
    assert_eq!(rec.status, oms_schemas::OutboxStatus::Failed);
    assert_eq!(rec.retry_count, rec.max_retries);

    // Exactly one dead letter for this event, no matter how many extra
    // passes ran.
    let (n,): (i64,) = sqlx::query_as(
        "select count(*)::bigint from outbox_dead_letters where event_id = $1",
    )
    .bind(event_id)
    .fetch_one(&pool)
    .await?;
    assert_eq!(n, 1);

    Ok(())
}
