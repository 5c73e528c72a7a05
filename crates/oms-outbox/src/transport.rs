//! Transport adapters.
//!
//! A `Transport` delivers one serialized envelope to one subject. Retry
//! policy is NOT a transport concern: the dispatcher owns retries, backoff
//! and the DLQ so every adapter shares identical semantics.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

pub trait Transport: Send + Sync {
    fn name(&self) -> &str;
    /// Deliver `payload` (a serialized CloudEvents envelope) to `subject`.
    fn publish<'a>(&'a self, subject: &'a str, payload: Vec<u8>) -> BoxFuture<'a, Result<()>>;
}

// ---------------------------------------------------------------------------
// NATS adapter
// ---------------------------------------------------------------------------

pub struct NatsTransport {
    client: async_nats::Client,
    subject_prefix: String,
}

impl NatsTransport {
    /// Connect to the broker at `url`. Subjects are published under
    /// `{prefix}.{subject}` (e.g. `oms.schema.created`).
    pub async fn connect(url: &str, subject_prefix: &str) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .with_context(|| format!("nats connect {url}"))?;
        Ok(Self {
            client,
            subject_prefix: subject_prefix.to_string(),
        })
    }
}

impl Transport for NatsTransport {
    fn name(&self) -> &str {
        "nats"
    }

    fn publish<'a>(&'a self, subject: &'a str, payload: Vec<u8>) -> BoxFuture<'a, Result<()>> {
        async move {
            let full_subject = format!("{}.{subject}", self.subject_prefix);
            self.client
                .publish(full_subject.clone(), payload.into())
                .await
                .with_context(|| format!("nats publish {full_subject}"))?;
            // Force the write out so an ACK-then-crash on our side cannot
            // lose the message inside a client buffer.
            self.client.flush().await.context("nats flush")?;
            Ok(())
        }
        .boxed()
    }
}

// ---------------------------------------------------------------------------
// In-memory adapter (tests, local dev)
// ---------------------------------------------------------------------------

/// Captures published events; can be primed to fail the next N publishes
/// so dispatcher retry behavior is testable without a broker.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    sent: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    fail_remaining: Arc<AtomicUsize>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(String, Vec<u8>)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl Transport for InMemoryTransport {
    fn name(&self) -> &str {
        "in-memory"
    }

    fn publish<'a>(&'a self, subject: &'a str, payload: Vec<u8>) -> BoxFuture<'a, Result<()>> {
        async move {
            let remaining = self.fail_remaining.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
                anyhow::bail!("primed failure ({remaining} remaining)");
            }
            if let Ok(mut sent) = self.sent.lock() {
                sent.push((subject.to_string(), payload));
            }
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_transport_records_and_fails_on_demand() {
        let t = InMemoryTransport::new();
        t.publish("schema.created", b"{}".to_vec()).await.unwrap();
        assert_eq!(t.sent_count(), 1);

        t.fail_next(2);
        assert!(t.publish("x", vec![]).await.is_err());
        assert!(t.publish("x", vec![]).await.is_err());
        t.publish("x", vec![]).await.unwrap();
        assert_eq!(t.sent_count(), 2);
    }
}
