//! Tampering with any persisted audit line must break chain verification
//! at exactly that line.

use chrono::Utc;
use oms_audit::{verify_hash_chain_str, AuditWriter, VerifyResult};
use oms_schemas::{AuditChanges, AuditRecord};
use serde_json::json;
use uuid::Uuid;

fn record(action: &str, target_id: &str) -> AuditRecord {
    AuditRecord {
        event_id: Uuid::nil(),
        action: action.to_string(),
        actor_id: "svc-indexer".to_string(),
        actor_roles: vec!["service".to_string()],
        target_kind: "object_type".to_string(),
        target_id: target_id.to_string(),
        branch: Some("main".to_string()),
        success: true,
        error_code: None,
        duration_ms: 3,
        changes: AuditChanges::default(),
        metadata: json!({"note": "scenario"}),
        time_utc: Utc::now(),
    }
}

#[test]
fn edited_payload_breaks_the_chain_at_that_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");

    let mut w = AuditWriter::new(&path, true).unwrap();
    w.append(record("entity.create", "User")).unwrap();
    w.append(record("entity.update", "User")).unwrap();
    w.append(record("entity.delete", "User")).unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(matches!(
        verify_hash_chain_str(&content).unwrap(),
        VerifyResult::Valid { lines: 3 }
    ));

    // Tamper with the second line's payload without recomputing hashes.
    let tampered: String = content
        .lines()
        .enumerate()
        .map(|(i, line)| {
            if i == 1 {
                line.replace("entity.update", "entity.grant_admin")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    match verify_hash_chain_str(&tampered).unwrap() {
        VerifyResult::Broken { line, .. } => assert_eq!(line, 2),
        VerifyResult::Valid { .. } => panic!("tampered chain must not verify"),
    }
}

#[test]
fn dropped_line_breaks_the_chain() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");

    let mut w = AuditWriter::new(&path, true).unwrap();
    w.append(record("entity.create", "A")).unwrap();
    w.append(record("entity.create", "B")).unwrap();
    w.append(record("entity.create", "C")).unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let without_middle: String = content
        .lines()
        .enumerate()
        .filter(|(i, _)| *i != 1)
        .map(|(_, l)| l.to_string())
        .collect::<Vec<_>>()
        .join("\n");

    assert!(matches!(
        verify_hash_chain_str(&without_middle).unwrap(),
        VerifyResult::Broken { line: 2, .. }
    ));
}
