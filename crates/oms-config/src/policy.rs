//! Layered policy files.
//!
//! Deployments may ship YAML policy overlays (PII field lists, retention
//! rules). Files deep-merge in order, later files override earlier ones;
//! the merged document is canonicalized and hashed so two nodes can compare
//! `config_hash` values to detect drift.

use anyhow::{Context, Result};
use serde_json::Value;

use crate::{canonicalize_json, hash_canonical, read_yaml_as_json};

#[derive(Debug, Clone)]
pub struct LoadedPolicy {
    pub policy_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

/// Load + merge YAML policy files in order, canonicalize, hash.
///
/// An empty `paths` slice yields the empty-object policy with a stable hash,
/// so callers never special-case "no policy configured".
pub fn load_policy_files(paths: &[&str]) -> Result<LoadedPolicy> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let json_val = read_yaml_as_json(p)?;
        deep_merge(&mut merged, json_val);
    }

    let canonical = canonicalize_json(&merged);
    let hash = hash_canonical(&merged);

    Ok(LoadedPolicy {
        policy_json: serde_json::from_str(&canonical).context("canonical json parse failed")?,
        canonical_json: canonical,
        config_hash: hash,
    })
}

/// Deep-merge: objects merge recursively; arrays replaced; scalars
/// overwritten.
fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_yaml(dir: &tempfile::TempDir, name: &str, content: &str) -> String {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn later_files_override_earlier() {
        let dir = tempfile::tempdir().unwrap();
        let base = write_yaml(&dir, "base.yaml", "pii:\n  fields: [email]\n  mode: log\n");
        let prod = write_yaml(&dir, "prod.yaml", "pii:\n  mode: encrypt\n");

        let loaded = load_policy_files(&[&base, &prod]).unwrap();
        assert_eq!(loaded.policy_json["pii"]["mode"], "encrypt");
        assert_eq!(loaded.policy_json["pii"]["fields"][0], "email");
    }

    #[test]
    fn hash_is_stable_across_key_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_yaml(&dir, "a.yaml", "x: 1\ny: 2\n");
        let b = write_yaml(&dir, "b.yaml", "y: 2\nx: 1\n");

        let ha = load_policy_files(&[&a]).unwrap().config_hash;
        let hb = load_policy_files(&[&b]).unwrap().config_hash;
        assert_eq!(ha, hb);
    }

    #[test]
    fn empty_policy_has_stable_hash() {
        let l1 = load_policy_files(&[]).unwrap();
        let l2 = load_policy_files(&[]).unwrap();
        assert_eq!(l1.config_hash, l2.config_hash);
        assert_eq!(l1.canonical_json, "{}");
    }
}
