//! Runtime configuration.
//!
//! Env vars are the source of truth; every recognized option has a
//! documented default so a bare environment boots a working dev instance.
//! Optional layered YAML policy files (PII rules, retention) deep-merge in
//! order and produce a canonical SHA-256 `config_hash` that the daemon logs
//! at boot and exposes in `/v1/status` for drift detection.

use anyhow::{Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

pub mod policy;

pub use policy::{load_policy_files, LoadedPolicy};

// ---------------------------------------------------------------------------
// Env helpers
// ---------------------------------------------------------------------------

fn env_str(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_i64(name: &str, default: i64) -> i64 {
    env_str(name).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    env_str(name).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    match env_str(name) {
        Some(v) => v == "1" || v.eq_ignore_ascii_case("true"),
        None => default,
    }
}

// ---------------------------------------------------------------------------
// PII policy
// ---------------------------------------------------------------------------

/// What the sanitizer does with a PII hit before persistence.
///
/// `Block` fails the enclosing transaction; the other modes transform the
/// value in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PiiHandling {
    Log,
    Anonymize,
    Encrypt,
    Block,
}

impl PiiHandling {
    pub fn as_str(&self) -> &'static str {
        match self {
            PiiHandling::Log => "log",
            PiiHandling::Anonymize => "anonymize",
            PiiHandling::Encrypt => "encrypt",
            PiiHandling::Block => "block",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "log" => Ok(PiiHandling::Log),
            "anonymize" => Ok(PiiHandling::Anonymize),
            "encrypt" => Ok(PiiHandling::Encrypt),
            "block" => Ok(PiiHandling::Block),
            other => anyhow::bail!("invalid PII_HANDLING: {other}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Section configs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_issuer: Option<String>,
    pub jwt_audience: Option<String>,
    pub jwks_url: Option<String>,
    pub token_cache_ttl_s: i64,
}

#[derive(Debug, Clone)]
pub struct LockConfig {
    /// TTL sweeper cadence.
    pub sweep_ttl_s: i64,
    /// Heartbeat sweeper cadence.
    pub sweep_heartbeat_s: i64,
    /// Default acquisition timeout.
    pub default_timeout_s: i64,
    /// A lock is heartbeat-expired after `grace_factor · interval` without
    /// a heartbeat.
    pub heartbeat_grace_factor: i64,
}

#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub max_retries: i32,
    pub max_event_age_s: i64,
    pub backoff_base_ms: i64,
    pub backoff_max_ms: i64,
}

#[derive(Debug, Clone)]
pub struct ShadowConfig {
    pub switch_timeout_s: i64,
    pub backup_before_switch: bool,
}

#[derive(Debug, Clone)]
pub struct PiiConfig {
    pub handling: PiiHandling,
    pub encryption_key_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub fail_threshold: u32,
    pub open_ms: i64,
    pub half_open_probes: u32,
}

// ---------------------------------------------------------------------------
// CoreConfig
// ---------------------------------------------------------------------------

/// Everything the core reads from the environment, in one place.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub auth: AuthConfig,
    pub locks: LockConfig,
    pub outbox: OutboxConfig,
    pub shadow: ShadowConfig,
    pub pii: PiiConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl CoreConfig {
    /// Read every recognized option; unset options take their defaults.
    ///
    /// Fails only on values that parse but violate a bound (e.g. a switch
    /// timeout above 10 s), so misconfiguration surfaces at boot rather
    /// than mid-switch.
    pub fn from_env() -> Result<Self> {
        let shadow_timeout = env_i64("SHADOW_SWITCH_TIMEOUT_S", 10);
        if !(1..=10).contains(&shadow_timeout) {
            anyhow::bail!("SHADOW_SWITCH_TIMEOUT_S must be in 1..=10, got {shadow_timeout}");
        }

        let pii_handling = match env_str("PII_HANDLING") {
            Some(v) => PiiHandling::parse(&v)?,
            None => PiiHandling::Anonymize,
        };

        Ok(Self {
            auth: AuthConfig {
                jwt_issuer: env_str("JWT_ISSUER"),
                jwt_audience: env_str("JWT_AUDIENCE"),
                jwks_url: env_str("JWKS_URL"),
                token_cache_ttl_s: env_i64("AUTH_TOKEN_CACHE_TTL_S", 60),
            },
            locks: LockConfig {
                sweep_ttl_s: env_i64("LOCK_SWEEP_TTL_S", 300),
                sweep_heartbeat_s: env_i64("LOCK_SWEEP_HEARTBEAT_S", 30),
                default_timeout_s: env_i64("LOCK_DEFAULT_TIMEOUT_S", 30),
                heartbeat_grace_factor: env_i64("LOCK_HEARTBEAT_GRACE_FACTOR", 3),
            },
            outbox: OutboxConfig {
                max_retries: env_i64("OUTBOX_MAX_RETRIES", 3) as i32,
                max_event_age_s: env_i64("OUTBOX_MAX_EVENT_AGE_S", 3600),
                backoff_base_ms: env_i64("OUTBOX_BACKOFF_BASE_MS", 500),
                backoff_max_ms: env_i64("OUTBOX_BACKOFF_MAX_MS", 60_000),
            },
            shadow: ShadowConfig {
                switch_timeout_s: shadow_timeout,
                backup_before_switch: env_bool("SHADOW_BACKUP_BEFORE_SWITCH", true),
            },
            pii: PiiConfig {
                handling: pii_handling,
                encryption_key_id: env_str("PII_ENCRYPTION_KEY_ID"),
            },
            circuit_breaker: CircuitBreakerConfig {
                fail_threshold: env_u32("CIRCUIT_BREAKER_FAIL_THRESHOLD", 5),
                open_ms: env_i64("CIRCUIT_BREAKER_OPEN_MS", 60_000),
                half_open_probes: env_u32("CIRCUIT_BREAKER_HALF_OPEN_PROBES", 3),
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Canonical JSON
// ---------------------------------------------------------------------------

/// Canonicalize JSON by sorting all object keys recursively and emitting
/// compact JSON. Shared by the policy hash and the audit chain.
pub fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

pub(crate) fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// SHA-256 over canonical JSON bytes, hex-encoded.
pub fn hash_canonical(v: &Value) -> String {
    let canonical = canonicalize_json(v);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Read one YAML file into a JSON value.
pub(crate) fn read_yaml_as_json(path: &str) -> Result<Value> {
    let s = fs::read_to_string(path).with_context(|| format!("read policy file: {path}"))?;
    let yaml_val: serde_yaml::Value =
        serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {path}"))?;
    serde_json::to_value(yaml_val).context("yaml->json conversion failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unset_env_takes_documented_defaults() {
        // Run against a clean env: rely on defaults for unset vars.
        let cfg = CoreConfig::from_env().unwrap();
        assert_eq!(cfg.locks.heartbeat_grace_factor, 3);
        assert_eq!(cfg.outbox.max_retries, 3);
        assert_eq!(cfg.outbox.max_event_age_s, 3600);
        assert!(cfg.shadow.switch_timeout_s <= 10);
        assert_eq!(cfg.circuit_breaker.fail_threshold, 5);
        assert_eq!(cfg.circuit_breaker.half_open_probes, 3);
    }

    #[test]
    fn pii_handling_parses_all_modes() {
        for (s, want) in [
            ("log", PiiHandling::Log),
            ("anonymize", PiiHandling::Anonymize),
            ("encrypt", PiiHandling::Encrypt),
            ("block", PiiHandling::Block),
        ] {
            assert_eq!(PiiHandling::parse(s).unwrap(), want);
        }
        assert!(PiiHandling::parse("redact").is_err());
    }

    #[test]
    fn canonical_hash_is_key_order_independent() {
        let a = json!({"b": 1, "a": {"y": 2, "x": 3}});
        let b = json!({"a": {"x": 3, "y": 2}, "b": 1});
        assert_eq!(hash_canonical(&a), hash_canonical(&b));
    }
}
