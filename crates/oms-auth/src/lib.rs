//! Identity and scope enforcement.
//!
//! The core is NOT an IAM: tokens are issued elsewhere and validated here
//! against a JWKS cache (`iss`, `aud`, `exp`, `kid`), then reduced to a
//! [`UserContext`]. Authorization is scope-driven — role identity alone is
//! never sufficient — through a default-deny capability matrix.

use serde::{Deserialize, Serialize};

mod jwks;
mod scopes;
mod token;

pub use jwks::JwksCache;
pub use scopes::{role_for_scopes, Capability, PermissionMatrix};
pub use token::{TokenValidator, ValidatedToken};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum AuthError {
    /// Token missing, malformed, expired, or signature-invalid.
    Unauthenticated(String),
    /// Valid identity without the required scope.
    Forbidden(String),
    /// JWKS endpoint unreachable.
    Unavailable(String),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::Unauthenticated(m) => write!(f, "unauthenticated: {m}"),
            AuthError::Forbidden(m) => write!(f, "forbidden: {m}"),
            AuthError::Unavailable(m) => write!(f, "auth unavailable: {m}"),
        }
    }
}

impl std::error::Error for AuthError {}

// ---------------------------------------------------------------------------
// UserContext
// ---------------------------------------------------------------------------

/// Identity claims extracted from a validated token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserContext {
    pub sub: String,
    pub username: String,
    pub email: Option<String>,
    pub roles: Vec<String>,
    pub scopes: Vec<String>,
    pub tenant: Option<String>,
}

impl UserContext {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    /// Scope-driven capability check; see [`Capability::required_scope`].
    pub fn can(&self, capability: Capability) -> bool {
        self.has_scope(capability.required_scope())
    }

    /// Service-account context used by internal workers (sweepers,
    /// dispatcher) when recording audit actors.
    pub fn service(name: &str) -> Self {
        Self {
            sub: format!("svc:{name}"),
            username: name.to_string(),
            email: None,
            roles: vec!["service".to_string()],
            scopes: vec![Capability::ServiceAccount.required_scope().to_string()],
            tenant: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_not_role_governs() {
        let ctx = UserContext {
            sub: "u1".to_string(),
            username: "root".to_string(),
            email: None,
            // Admin role WITHOUT the admin scope.
            roles: vec!["admin".to_string()],
            scopes: vec!["api:schemas:read".to_string()],
            tenant: None,
        };
        assert!(ctx.can(Capability::SchemasRead));
        assert!(!ctx.can(Capability::SystemAdmin), "role alone is never sufficient");
    }

    #[test]
    fn service_context_carries_the_service_scope() {
        let ctx = UserContext::service("indexer");
        assert!(ctx.can(Capability::ServiceAccount));
        assert!(!ctx.can(Capability::SchemasWrite));
    }
}
