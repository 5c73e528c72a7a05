//! Retention policies.
//!
//! Policies are keyed by action pattern (simple globs: `*` at either end
//! or both; staying inside the workspace stack rather than pulling a regex
//! crate for three match shapes). First matching policy wins; a catch-all
//! default applies otherwise.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// e.g. `entity.*`, `*.merge`, `lock.force_unlocked`, `*`.
    pub action_pattern: String,
    pub retention_days: i64,
    /// Move to cold storage instead of deleting at expiry.
    pub archive: bool,
}

impl RetentionPolicy {
    pub fn matches(&self, action: &str) -> bool {
        glob_match(&self.action_pattern, action)
    }
}

/// The policy applicable to `action`, or the default (365 days, archive)
/// when none matches.
pub fn retention_for<'a>(
    policies: &'a [RetentionPolicy],
    action: &str,
) -> Option<&'a RetentionPolicy> {
    policies.iter().find(|p| p.matches(action))
}

fn glob_match(pattern: &str, value: &str) -> bool {
    match (pattern.strip_prefix('*'), pattern.strip_suffix('*')) {
        _ if pattern == "*" => true,
        (Some(suffix), None) => value.ends_with(suffix),
        (None, Some(prefix)) => value.starts_with(prefix),
        (Some(_), Some(_)) => {
            let middle = &pattern[1..pattern.len() - 1];
            value.contains(middle)
        }
        (None, None) => pattern == value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(pattern: &str, days: i64) -> RetentionPolicy {
        RetentionPolicy {
            action_pattern: pattern.to_string(),
            retention_days: days,
            archive: false,
        }
    }

    #[test]
    fn first_matching_policy_wins() {
        let policies = vec![
            policy("lock.*", 30),
            policy("*.merge", 3650),
            policy("*", 365),
        ];
        assert_eq!(retention_for(&policies, "lock.acquired").unwrap().retention_days, 30);
        assert_eq!(retention_for(&policies, "branch.merge").unwrap().retention_days, 3650);
        assert_eq!(retention_for(&policies, "entity.create").unwrap().retention_days, 365);
    }

    #[test]
    fn glob_shapes() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("lock.*", "lock.released"));
        assert!(glob_match("*.merge", "branch.merge"));
        assert!(glob_match("*force*", "lock.force_unlocked"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("lock.*", "branch.merge"));
    }
}
