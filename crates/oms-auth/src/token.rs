//! Access-token validation.
//!
//! Verify signature (JWKS, RS256), `iss`, `aud`, `exp`, then reduce the
//! claims to a [`UserContext`]. Validated tokens are cached under a short
//! TTL keyed by token digest; role-change events invalidate by subject.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::debug;

use oms_config::AuthConfig;

use crate::{jwks::JwksCache, AuthError, UserContext};

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
    /// Space-separated per RFC 8693; some issuers send an array instead.
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    scopes: Option<Vec<String>>,
    #[serde(default)]
    tenant: Option<String>,
}

/// A cache entry: the context plus its expiry.
#[derive(Clone)]
pub struct ValidatedToken {
    pub context: UserContext,
    pub cached_until: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TokenValidator {
    cfg: AuthConfig,
    jwks: JwksCache,
    cache: Arc<RwLock<HashMap<String, ValidatedToken>>>,
}

impl TokenValidator {
    pub fn new(cfg: AuthConfig) -> Result<Self, AuthError> {
        let jwks_url = cfg
            .jwks_url
            .clone()
            .ok_or_else(|| AuthError::Unavailable("JWKS_URL is not configured".to_string()))?;
        Ok(Self {
            jwks: JwksCache::new(&jwks_url),
            cfg,
            cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Validate a bearer token, consulting the short-TTL cache first.
    pub async fn validate(&self, token: &str) -> Result<UserContext, AuthError> {
        let cache_key = token_digest(token);

        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&cache_key) {
                if entry.cached_until > Utc::now() {
                    return Ok(entry.context.clone());
                }
            }
        }

        let context = self.validate_uncached(token).await?;

        let ttl = Duration::seconds(self.cfg.token_cache_ttl_s.max(1));
        let mut cache = self.cache.write().await;
        cache.retain(|_, v| v.cached_until > Utc::now());
        cache.insert(
            cache_key,
            ValidatedToken {
                context: context.clone(),
                cached_until: Utc::now() + ttl,
            },
        );

        Ok(context)
    }

    async fn validate_uncached(&self, token: &str) -> Result<UserContext, AuthError> {
        let header = decode_header(token)
            .map_err(|e| AuthError::Unauthenticated(format!("malformed token header: {e}")))?;
        let kid = header
            .kid
            .ok_or_else(|| AuthError::Unauthenticated("token missing kid".to_string()))?;

        let key = self
            .jwks
            .key_for(&kid)
            .await
            .map_err(|e| AuthError::Unauthenticated(format!("unknown signing key: {e:#}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        if let Some(iss) = &self.cfg.jwt_issuer {
            validation.set_issuer(&[iss]);
        }
        if let Some(aud) = &self.cfg.jwt_audience {
            validation.set_audience(&[aud]);
        }

        let data = decode::<Claims>(token, &key, &validation)
            .map_err(|e| AuthError::Unauthenticated(format!("token rejected: {e}")))?;

        Ok(context_from_claims(data.claims))
    }

    /// Drop cached tokens for one subject (role-change event) or all.
    pub async fn invalidate_subject(&self, sub: &str) {
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|_, v| v.context.sub != sub);
        debug!(sub = %sub, dropped = before - cache.len(), "token cache invalidated for subject");
    }

    pub async fn invalidate_all(&self) {
        self.cache.write().await.clear();
    }

    pub async fn cached_count(&self) -> usize {
        self.cache.read().await.len()
    }
}

fn context_from_claims(claims: Claims) -> UserContext {
    let scopes = match (claims.scopes, claims.scope) {
        (Some(list), _) => list,
        (None, Some(s)) => s.split_whitespace().map(str::to_string).collect(),
        (None, None) => Vec::new(),
    };

    UserContext {
        username: claims.preferred_username.unwrap_or_else(|| claims.sub.clone()),
        sub: claims.sub,
        email: claims.email,
        roles: claims.roles,
        scopes,
        tenant: claims.tenant,
    }
}

/// Cache key: never store the raw token.
fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_string_and_scope_array_both_parse() {
        let from_string = context_from_claims(Claims {
            sub: "u1".to_string(),
            preferred_username: Some("alice".to_string()),
            email: None,
            roles: vec![],
            scope: Some("api:schemas:read api:schemas:write".to_string()),
            scopes: None,
            tenant: None,
        });
        assert_eq!(from_string.scopes.len(), 2);
        assert!(from_string.has_scope("api:schemas:write"));

        let from_array = context_from_claims(Claims {
            sub: "u2".to_string(),
            preferred_username: None,
            email: None,
            roles: vec![],
            scope: None,
            scopes: Some(vec!["api:system:admin".to_string()]),
            tenant: None,
        });
        assert!(from_array.has_scope("api:system:admin"));
        assert_eq!(from_array.username, "u2", "username falls back to sub");
    }

    #[test]
    fn token_digest_is_stable_and_opaque() {
        let a = token_digest("header.payload.sig");
        let b = token_digest("header.payload.sig");
        assert_eq!(a, b);
        assert!(!a.contains("payload"));
        assert_eq!(a.len(), 64);
    }
}
