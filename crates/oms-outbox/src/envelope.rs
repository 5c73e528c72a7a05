//! Envelope construction for state-changing commands.
//!
//! Every write builds a CloudEvents 1.0 envelope here; the PII sanitizer
//! runs over the payload before the envelope is handed to
//! `outbox_insert`, so nothing sensitive ever reaches the outbox table —
//! and therefore nothing sensitive can be replayed to consumers.

use anyhow::Result;
use serde_json::Value;
use uuid::Uuid;

use oms_audit::Sanitizer;
use oms_db::outbox::NewOutboxEvent;
use oms_schemas::EventEnvelope;

pub const EVENT_SOURCE: &str = "/oms/core";

/// Inputs a command supplies for one event.
#[derive(Debug, Clone)]
pub struct EventInput {
    pub event_type: String,
    pub subject: String,
    pub data: Value,
    pub branch: String,
    pub author: String,
    pub correlation_id: Option<Uuid>,
    pub causation_id: Option<Uuid>,
    pub commit: Option<String>,
    pub tenant: Option<String>,
    pub idempotency_key: Option<String>,
}

/// Build the sanitized envelope and the outbox row for it.
///
/// Fails only under the `block` PII policy, which must abort the caller's
/// transaction.
pub fn build_event(
    sanitizer: &Sanitizer,
    max_retries: i32,
    input: EventInput,
) -> Result<(EventEnvelope, NewOutboxEvent)> {
    let mut data = input.data;
    let outcome = sanitizer.sanitize(&mut data)?;
    if outcome.hits > 0 {
        tracing::debug!(
            subject = %input.subject,
            hits = outcome.hits,
            "event payload sanitized before outbox insert"
        );
    }

    let mut envelope = EventEnvelope::new(
        input.event_type,
        EVENT_SOURCE,
        input.subject,
        data,
        input.branch,
        input.author,
    );
    if let Some(c) = input.correlation_id {
        envelope.ce_correlationid = c;
    }
    envelope.ce_causationid = input.causation_id;
    envelope.ce_commit = input.commit;
    envelope.ce_tenant = input.tenant;

    let record = NewOutboxEvent {
        event_id: envelope.id,
        event_type: envelope.event_type.clone(),
        subject: envelope.subject.clone(),
        correlation_id: envelope.ce_correlationid,
        idempotency_key: input.idempotency_key,
        data: serde_json::to_value(&envelope)?,
        max_retries,
    };

    Ok((envelope, record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use oms_config::{PiiConfig, PiiHandling};
    use serde_json::json;

    fn sanitizer(handling: PiiHandling) -> Sanitizer {
        Sanitizer::new(
            &PiiConfig {
                handling,
                encryption_key_id: None,
            },
            Vec::new(),
        )
    }

    fn input() -> EventInput {
        EventInput {
            event_type: "com.oms.schema.created".to_string(),
            subject: "schema.created".to_string(),
            data: json!({ "api_name": "User", "email": "alice@example.com" }),
            branch: "feature/x".to_string(),
            author: "alice".to_string(),
            correlation_id: None,
            causation_id: None,
            commit: Some("c-17".to_string()),
            tenant: None,
            idempotency_key: Some("feature/x:User:create".to_string()),
        }
    }

    #[test]
    fn envelope_is_sanitized_before_persistence() {
        let (envelope, record) = build_event(&sanitizer(PiiHandling::Anonymize), 3, input()).unwrap();
        assert_ne!(envelope.data["email"], "alice@example.com");
        // The persisted row carries the sanitized envelope, so replay can
        // never leak the raw value.
        assert_eq!(record.data["data"]["email"], envelope.data["email"]);
        assert_eq!(record.event_id, envelope.id);
        assert_eq!(envelope.specversion, "1.0");
        assert_eq!(envelope.ce_commit.as_deref(), Some("c-17"));
    }

    #[test]
    fn block_policy_propagates_as_an_error() {
        assert!(build_event(&sanitizer(PiiHandling::Block), 3, input()).is_err());
    }
}
