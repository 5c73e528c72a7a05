//! Audit recorder.
//!
//! Two persistence paths share one record shape:
//!
//! - rows in `audit_events`, written through the store gateway inside the
//!   business transaction (that path lives in `oms-db`);
//! - an append-only JSON-Lines log with an optional hash chain, for
//!   tamper-evident local capture and offline verification.
//!
//! PII masking runs before either path sees the record; retention policies
//! decide how long records live per action pattern.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use oms_schemas::AuditRecord;

pub mod pii;
pub mod retention;

pub use pii::{sanitize_value, PiiOutcome, Sanitizer};
pub use retention::{retention_for, RetentionPolicy};

// ---------------------------------------------------------------------------
// Chained event
// ---------------------------------------------------------------------------

/// One line of the JSONL log: the record plus its chain links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainedAuditEvent {
    #[serde(flatten)]
    pub record: AuditRecord,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Append-only audit writer. Writes JSON Lines (one event per line).
/// Optional hash chain: each event carries hash_prev + hash_self.
pub struct AuditWriter {
    path: PathBuf,
    hash_chain: bool,
    last_hash: Option<String>,
    /// Monotonic sequence for deterministic event-id derivation. Restore
    /// with `set_seq` alongside `set_last_hash` when resuming a log.
    seq: u64,
}

impl AuditWriter {
    /// Creates the audit writer and ensures parent dirs exist.
    pub fn new(path: impl AsRef<Path>, hash_chain: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create_dir_all {parent:?}"))?;
        }

        Ok(Self {
            path,
            hash_chain,
            last_hash: None,
            seq: 0,
        })
    }

    /// Set last hash explicitly (e.g. after reading the last line on
    /// restart).
    pub fn set_last_hash(&mut self, last_hash: Option<String>) {
        self.last_hash = last_hash;
    }

    pub fn last_hash(&self) -> Option<String> {
        self.last_hash.clone()
    }

    /// Restore the sequence counter when resuming an existing log. Pass
    /// the number of events already written.
    pub fn set_seq(&mut self, seq: u64) {
        self.seq = seq;
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Append one record. The record's `event_id` is replaced with a
    /// deterministic derivation from chain state + content + seq, so a
    /// replayed append converges instead of forking the chain.
    pub fn append(&mut self, mut record: AuditRecord) -> Result<ChainedAuditEvent> {
        record.event_id = derive_event_id(self.last_hash.as_deref(), &record, self.seq)?;
        self.seq += 1;

        let mut ev = ChainedAuditEvent {
            record,
            hash_prev: None,
            hash_self: None,
        };

        if self.hash_chain {
            ev.hash_prev = self.last_hash.clone();
            let self_hash = compute_event_hash(&ev)?;
            ev.hash_self = Some(self_hash.clone());
            self.last_hash = Some(self_hash);
        }

        let line = canonical_json_line(&ev)?;
        append_line(&self.path, &line)?;

        Ok(ev)
    }
}

/// Derive a stable event id from the chain tip, record content, and
/// sequence number. No RNG: replaying the same log yields the same ids.
fn derive_event_id(last_hash: Option<&str>, record: &AuditRecord, seq: u64) -> Result<Uuid> {
    let payload = canonical_json_line(&serde_json::json!({
        "action": record.action,
        "actor_id": record.actor_id,
        "target_kind": record.target_kind,
        "target_id": record.target_id,
        "metadata": record.metadata,
    }))?;
    let data = format!("oms-audit.v1|{}|{}|{}", last_hash.unwrap_or(""), payload, seq);
    Ok(Uuid::new_v5(&Uuid::NAMESPACE_OID, data.as_bytes()))
}

/// Write a single line to the file (with trailing newline).
fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open audit log {path:?}"))?;
    f.write_all(line.as_bytes())
        .context("write audit line failed")?;
    f.write_all(b"\n").context("write newline failed")?;
    Ok(())
}

/// Canonicalize by sorting keys recursively and emitting compact JSON.
/// One event == one JSON line.
fn canonical_json_line<T: Serialize>(v: &T) -> Result<String> {
    let raw = serde_json::to_value(v).context("serialize audit event failed")?;
    Ok(oms_config::canonicalize_json(&raw))
}

/// Chain hash is computed from canonical JSON of the event WITHOUT
/// hash_self (to avoid self-reference).
pub fn compute_event_hash(ev: &ChainedAuditEvent) -> Result<String> {
    let mut clone = ev.clone();
    clone.hash_self = None;

    let canonical = canonical_json_line(&clone)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Result of hash chain verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    /// The entire chain is valid.
    Valid { lines: usize },
    /// The chain is broken at the given line.
    Broken { line: usize, reason: String },
}

/// Verify the hash chain integrity of an audit log file.
pub fn verify_hash_chain(path: impl AsRef<Path>) -> Result<VerifyResult> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("read audit log {:?}", path.as_ref()))?;
    verify_hash_chain_str(&content)
}

/// Verify the hash chain integrity of JSONL content in memory.
pub fn verify_hash_chain_str(content: &str) -> Result<VerifyResult> {
    let mut prev_hash: Option<String> = None;
    let mut line_count = 0usize;

    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let ev: ChainedAuditEvent = serde_json::from_str(trimmed)
            .with_context(|| format!("parse audit event at line {}", i + 1))?;

        line_count += 1;

        // 1. hash_prev must match the previous event's hash_self.
        if ev.hash_prev != prev_hash {
            return Ok(VerifyResult::Broken {
                line: i + 1,
                reason: format!(
                    "hash_prev mismatch: expected {prev_hash:?}, got {:?}",
                    ev.hash_prev
                ),
            });
        }

        // 2. hash_self must be correct for this event's content.
        if let Some(ref claimed_hash) = ev.hash_self {
            let recomputed = compute_event_hash(&ev)?;
            if *claimed_hash != recomputed {
                return Ok(VerifyResult::Broken {
                    line: i + 1,
                    reason: format!(
                        "hash_self mismatch: claimed {claimed_hash}, recomputed {recomputed}"
                    ),
                });
            }
        }

        prev_hash = ev.hash_self.clone();
    }

    Ok(VerifyResult::Valid { lines: line_count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use oms_schemas::AuditChanges;
    use serde_json::json;

    fn record(action: &str) -> AuditRecord {
        AuditRecord {
            event_id: Uuid::nil(),
            action: action.to_string(),
            actor_id: "alice".to_string(),
            actor_roles: vec!["editor".to_string()],
            target_kind: "object_type".to_string(),
            target_id: "User".to_string(),
            branch: Some("feature/x".to_string()),
            success: true,
            error_code: None,
            duration_ms: 12,
            changes: AuditChanges::default(),
            metadata: json!({}),
            time_utc: Utc::now(),
        }
    }

    #[test]
    fn appended_events_chain_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut w = AuditWriter::new(&path, true).unwrap();

        w.append(record("entity.create")).unwrap();
        w.append(record("entity.update")).unwrap();
        w.append(record("branch.merge")).unwrap();

        match verify_hash_chain(&path).unwrap() {
            VerifyResult::Valid { lines } => assert_eq!(lines, 3),
            VerifyResult::Broken { line, reason } => panic!("broken at {line}: {reason}"),
        }
    }

    #[test]
    fn event_ids_are_deterministic_for_a_given_chain_state() {
        let a = derive_event_id(None, &record("x"), 0).unwrap();
        let b = derive_event_id(None, &record("x"), 0).unwrap();
        let c = derive_event_id(None, &record("x"), 1).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
