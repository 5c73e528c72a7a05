//! Transactional outbox + event publisher.
//!
//! Commands build sanitized CloudEvents envelopes and insert them in the
//! same transaction as the business change (`oms-db::outbox_insert`); the
//! dispatcher delivers them at-least-once across the configured
//! transports with shared retry/DLQ semantics; consumers deduplicate by
//! `event.id`.

mod consumer;
mod dispatcher;
mod envelope;
mod projector;
mod transport;

pub use consumer::process_deduped;
pub use dispatcher::{backoff_ms, spawn_dispatcher, DispatchOutcome, Dispatcher};
pub use envelope::{build_event, EventInput, EVENT_SOURCE};
pub use projector::{project_audit_once, spawn_audit_projector, PROJECTOR_NAME};
pub use transport::{InMemoryTransport, NatsTransport, Transport};
