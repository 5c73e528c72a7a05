//! Scope → capability mapping and the per-endpoint permission matrix.
//!
//! Mapping is a deterministic function of the token's scope set. Any
//! operation not present in the matrix is denied.

use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    SchemasRead,
    SchemasWrite,
    BranchesWrite,
    ProposalsApprove,
    SystemAdmin,
    ServiceAccount,
}

impl Capability {
    pub fn required_scope(&self) -> &'static str {
        match self {
            Capability::SchemasRead => "api:schemas:read",
            Capability::SchemasWrite => "api:schemas:write",
            Capability::BranchesWrite => "api:branches:write",
            Capability::ProposalsApprove => "api:proposals:approve",
            Capability::SystemAdmin => "api:system:admin",
            Capability::ServiceAccount => "api:service:account",
        }
    }
}

/// Deterministic role derivation from a scope set: the broadest scope
/// names the role. Informational only — enforcement always checks scopes.
pub fn role_for_scopes(scopes: &[String]) -> &'static str {
    let has = |c: Capability| scopes.iter().any(|s| s == c.required_scope());
    if has(Capability::SystemAdmin) {
        "admin"
    } else if has(Capability::ServiceAccount) {
        "service"
    } else if has(Capability::ProposalsApprove) {
        "approver"
    } else if has(Capability::SchemasWrite) || has(Capability::BranchesWrite) {
        "editor"
    } else if has(Capability::SchemasRead) {
        "viewer"
    } else {
        "none"
    }
}

// ---------------------------------------------------------------------------
// Permission matrix
// ---------------------------------------------------------------------------

/// Operation-keyed permission matrix. Operations are stable names, not
/// HTTP routes, so transports share one table.
#[derive(Debug, Clone)]
pub struct PermissionMatrix {
    entries: HashMap<&'static str, Capability>,
}

impl Default for PermissionMatrix {
    fn default() -> Self {
        let mut entries = HashMap::new();

        entries.insert("schema.read", Capability::SchemasRead);
        entries.insert("schema.write", Capability::SchemasWrite);
        entries.insert("schema.delete", Capability::SchemasWrite);

        entries.insert("branch.create", Capability::BranchesWrite);
        entries.insert("branch.merge", Capability::BranchesWrite);
        entries.insert("branch.read", Capability::SchemasRead);
        entries.insert("branch.archive", Capability::SystemAdmin);

        entries.insert("proposal.approve", Capability::ProposalsApprove);

        entries.insert("lock.list", Capability::SchemasRead);
        entries.insert("lock.force_unlock", Capability::SystemAdmin);
        entries.insert("lock.extend", Capability::ServiceAccount);
        entries.insert("lock.heartbeat", Capability::ServiceAccount);

        entries.insert("indexing.start", Capability::ServiceAccount);
        entries.insert("indexing.progress", Capability::ServiceAccount);
        entries.insert("indexing.complete", Capability::ServiceAccount);
        entries.insert("indexing.switch", Capability::ServiceAccount);
        entries.insert("indexing.cancel", Capability::ServiceAccount);
        entries.insert("indexing.status", Capability::SchemasRead);

        entries.insert("compaction.run", Capability::SystemAdmin);

        Self { entries }
    }
}

impl PermissionMatrix {
    /// Capability required for `operation`; `None` means the operation is
    /// unknown and MUST be denied (default deny).
    pub fn required(&self, operation: &str) -> Option<Capability> {
        self.entries.get(operation).copied()
    }

    /// `true` iff the scope set covers `operation`.
    pub fn allows(&self, scopes: &[String], operation: &str) -> bool {
        match self.required(operation) {
            Some(cap) => scopes.iter().any(|s| s == cap.required_scope()),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn default_deny_for_unknown_operations() {
        let m = PermissionMatrix::default();
        let all = scopes(&[
            "api:schemas:read",
            "api:schemas:write",
            "api:branches:write",
            "api:proposals:approve",
            "api:system:admin",
            "api:service:account",
        ]);
        assert!(!m.allows(&all, "totally.unknown"));
        assert!(m.required("totally.unknown").is_none());
    }

    #[test]
    fn matrix_maps_operations_to_their_scopes() {
        let m = PermissionMatrix::default();
        assert!(m.allows(&scopes(&["api:schemas:write"]), "schema.write"));
        assert!(!m.allows(&scopes(&["api:schemas:read"]), "schema.write"));
        assert!(m.allows(&scopes(&["api:branches:write"]), "branch.merge"));
        assert!(m.allows(&scopes(&["api:system:admin"]), "lock.force_unlock"));
        assert!(!m.allows(&scopes(&["api:branches:write"]), "lock.force_unlock"));
        assert!(m.allows(&scopes(&["api:service:account"]), "indexing.complete"));
        assert!(m.allows(&scopes(&["api:proposals:approve"]), "proposal.approve"));
    }

    #[test]
    fn role_derivation_is_deterministic_and_scope_driven() {
        assert_eq!(role_for_scopes(&scopes(&["api:system:admin"])), "admin");
        assert_eq!(role_for_scopes(&scopes(&["api:service:account"])), "service");
        assert_eq!(role_for_scopes(&scopes(&["api:schemas:write"])), "editor");
        assert_eq!(role_for_scopes(&scopes(&["api:schemas:read"])), "viewer");
        assert_eq!(role_for_scopes(&scopes(&[])), "none");
    }
}
