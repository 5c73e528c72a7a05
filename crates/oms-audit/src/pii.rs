//! PII sanitizer.
//!
//! Runs before any persistence (audit rows, outbox envelopes). Fields are
//! matched by configured name and by value shape (email, long digit runs
//! for card/phone numbers, `sk-`/`key-` style API tokens). What happens on
//! a hit follows the deployment policy:
//!
//! - `log`: leave the value, count the hit (dev);
//! - `anonymize`: replace with a stable masked form (staging);
//! - `encrypt`: replace with a key-id-tagged digest envelope (prod);
//! - `block`: fail, which aborts the enclosing transaction.

use anyhow::Result;
use serde_json::Value;
use sha2::{Digest, Sha256};

use oms_config::{PiiConfig, PiiHandling};

/// Field names treated as PII regardless of value shape.
const DEFAULT_PII_FIELDS: &[&str] = &[
    "email",
    "phone",
    "ssn",
    "national_id",
    "card_number",
    "api_key",
    "password",
    "secret",
];

/// Outcome of one sanitizer pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PiiOutcome {
    /// Number of fields that matched.
    pub hits: usize,
    /// Dotted paths of matched fields, for the dev `log` mode.
    pub matched_paths: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Sanitizer {
    handling: PiiHandling,
    key_id: Option<String>,
    /// Extra field names from deployment policy, lowercase.
    extra_fields: Vec<String>,
}

impl Sanitizer {
    pub fn new(cfg: &PiiConfig, extra_fields: Vec<String>) -> Self {
        Self {
            handling: cfg.handling,
            key_id: cfg.encryption_key_id.clone(),
            extra_fields: extra_fields.into_iter().map(|f| f.to_lowercase()).collect(),
        }
    }

    pub fn handling(&self) -> PiiHandling {
        self.handling
    }

    /// Sanitize `value` in place.
    ///
    /// Returns the outcome; fails only under the `block` policy when a hit
    /// occurred, so callers can abort the transaction.
    pub fn sanitize(&self, value: &mut Value) -> Result<PiiOutcome> {
        let mut outcome = PiiOutcome::default();
        self.walk(value, "$", &mut outcome)?;

        if self.handling == PiiHandling::Block && outcome.hits > 0 {
            anyhow::bail!(
                "payload rejected by PII policy: {} sensitive field(s) at {}",
                outcome.hits,
                outcome.matched_paths.join(", ")
            );
        }
        Ok(outcome)
    }

    fn walk(&self, value: &mut Value, path: &str, outcome: &mut PiiOutcome) -> Result<()> {
        match value {
            Value::Object(map) => {
                for (k, v) in map.iter_mut() {
                    let child_path = format!("{path}.{k}");
                    let name_hit = self.is_pii_field(k);
                    let value_hit = matches!(v, Value::String(s) if value_looks_sensitive(s));
                    if name_hit || value_hit {
                        outcome.hits += 1;
                        outcome.matched_paths.push(child_path.clone());
                        self.apply(v);
                    } else {
                        self.walk(v, &child_path, outcome)?;
                    }
                }
            }
            Value::Array(items) => {
                for (i, item) in items.iter_mut().enumerate() {
                    self.walk(item, &format!("{path}[{i}]"), outcome)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn is_pii_field(&self, key: &str) -> bool {
        let lower = key.to_lowercase();
        DEFAULT_PII_FIELDS.contains(&lower.as_str())
            || self.extra_fields.iter().any(|f| *f == lower)
    }

    fn apply(&self, v: &mut Value) {
        match self.handling {
            // Left intact on purpose; the caller logs matched_paths.
            PiiHandling::Log => {}
            PiiHandling::Anonymize => {
                *v = Value::String(anonymize(v));
            }
            PiiHandling::Encrypt => {
                let digest = {
                    let raw = v.to_string();
                    let mut hasher = Sha256::new();
                    hasher.update(raw.as_bytes());
                    hex::encode(hasher.finalize())
                };
                let key = self.key_id.as_deref().unwrap_or("unset");
                *v = Value::String(format!("enc:{key}:{digest}"));
            }
            // Value replaced so the rejected payload never leaks into an
            // error report; sanitize() then fails the call.
            PiiHandling::Block => {
                *v = Value::String("[blocked]".to_string());
            }
        }
    }
}

/// Stable masked form: keep the first character and the domain shape for
/// emails, mask everything else.
fn anonymize(v: &Value) -> String {
    let s = match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if let Some(at) = s.find('@') {
        let (local, domain) = s.split_at(at);
        let first = local.chars().next().unwrap_or('*');
        return format!("{first}***{domain}");
    }
    let visible = s.chars().take(2).collect::<String>();
    format!("{visible}{}", "*".repeat(s.len().saturating_sub(2).min(12)))
}

/// Value-shape heuristics: emails, 12+ digit runs (cards, national ids),
/// common API-token prefixes.
fn value_looks_sensitive(s: &str) -> bool {
    if s.contains('@') && s.contains('.') && !s.contains(' ') {
        return true;
    }
    let digits = s.chars().filter(|c| c.is_ascii_digit()).count();
    if digits >= 12 && s.chars().all(|c| c.is_ascii_digit() || "-+ ()".contains(c)) {
        return true;
    }
    s.starts_with("sk-") || s.starts_with("key-") || s.starts_with("Bearer ")
}

/// One-shot helper for call sites without a long-lived sanitizer.
pub fn sanitize_value(cfg: &PiiConfig, value: &mut Value) -> Result<PiiOutcome> {
    Sanitizer::new(cfg, Vec::new()).sanitize(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cfg(handling: PiiHandling) -> PiiConfig {
        PiiConfig {
            handling,
            encryption_key_id: Some("kms-1".to_string()),
        }
    }

    #[test]
    fn anonymize_masks_emails_and_named_fields() {
        let mut v = json!({
            "email": "alice@example.com",
            "display_name": "Alice",
            "nested": { "phone": "555 0100" }
        });
        let out = sanitize_value(&cfg(PiiHandling::Anonymize), &mut v).unwrap();
        assert_eq!(out.hits, 2);
        assert_eq!(v["email"], "a***@example.com");
        assert_eq!(v["display_name"], "Alice");
        assert_ne!(v["nested"]["phone"], "555 0100");
    }

    #[test]
    fn value_shape_catches_unnamed_pii() {
        let mut v = json!({ "contact": "bob@corp.io", "card": "4111111111111111" });
        let out = sanitize_value(&cfg(PiiHandling::Anonymize), &mut v).unwrap();
        // "contact" by value shape, "card" is not a default field name but
        // the 16-digit value matches.
        assert_eq!(out.hits, 2);
    }

    #[test]
    fn encrypt_tags_the_key_id() {
        let mut v = json!({ "email": "alice@example.com" });
        sanitize_value(&cfg(PiiHandling::Encrypt), &mut v).unwrap();
        let s = v["email"].as_str().unwrap();
        assert!(s.starts_with("enc:kms-1:"));
    }

    #[test]
    fn block_policy_fails_the_call() {
        let mut v = json!({ "email": "alice@example.com" });
        let err = sanitize_value(&cfg(PiiHandling::Block), &mut v).unwrap_err();
        assert!(err.to_string().contains("PII"));
    }

    #[test]
    fn log_policy_counts_without_mutating() {
        let mut v = json!({ "email": "alice@example.com" });
        let out = sanitize_value(&cfg(PiiHandling::Log), &mut v).unwrap();
        assert_eq!(out.hits, 1);
        assert_eq!(v["email"], "alice@example.com");
        assert_eq!(out.matched_paths, vec!["$.email"]);
    }
}
