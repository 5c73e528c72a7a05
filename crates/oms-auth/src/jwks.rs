//! JWKS cache with automatic rotation.
//!
//! Keys are fetched lazily and re-fetched when an unknown `kid` arrives
//! (the issuer rotated) or the refresh window lapses. The raw JWKS
//! document is parsed into `jsonwebtoken::DecodingKey`s once per fetch.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::info;

/// Minimum spacing between fetches so a flood of unknown-kid tokens
/// cannot hammer the issuer.
const MIN_FETCH_SPACING_S: i64 = 30;
/// Background refresh window.
const REFRESH_WINDOW_S: i64 = 3600;

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    kid: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

struct CacheInner {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct JwksCache {
    url: String,
    client: reqwest::Client,
    inner: Arc<RwLock<CacheInner>>,
}

impl JwksCache {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: reqwest::Client::new(),
            inner: Arc::new(RwLock::new(CacheInner {
                keys: HashMap::new(),
                fetched_at: None,
            })),
        }
    }

    /// Key for `kid`, fetching/rotating as needed.
    pub async fn key_for(&self, kid: &str) -> Result<DecodingKey> {
        {
            let inner = self.inner.read().await;
            let fresh = inner
                .fetched_at
                .map(|t| Utc::now() - t < Duration::seconds(REFRESH_WINDOW_S))
                .unwrap_or(false);
            if fresh {
                if let Some(key) = inner.keys.get(kid) {
                    return Ok(key.clone());
                }
            }
        }

        // Miss or stale: refetch (rotation) unless we just did.
        self.refresh().await?;

        let inner = self.inner.read().await;
        inner
            .keys
            .get(kid)
            .cloned()
            .with_context(|| format!("no JWKS key for kid '{kid}' after refresh"))
    }

    async fn refresh(&self) -> Result<()> {
        {
            let inner = self.inner.read().await;
            if let Some(t) = inner.fetched_at {
                if Utc::now() - t < Duration::seconds(MIN_FETCH_SPACING_S) {
                    return Ok(());
                }
            }
        }

        let doc: JwksDocument = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("fetch JWKS from {}", self.url))?
            .error_for_status()
            .context("JWKS endpoint returned an error status")?
            .json()
            .await
            .context("parse JWKS document")?;

        let keys = parse_jwks(&doc)?;
        let count = keys.len();

        let mut inner = self.inner.write().await;
        inner.keys = keys;
        inner.fetched_at = Some(Utc::now());
        info!(url = %self.url, keys = count, "JWKS cache refreshed");
        Ok(())
    }
}

fn parse_jwks(doc: &JwksDocument) -> Result<HashMap<String, DecodingKey>> {
    let mut out = HashMap::new();
    for jwk in &doc.keys {
        if jwk.kty != "RSA" {
            continue;
        }
        let (Some(kid), Some(n), Some(e)) = (&jwk.kid, &jwk.n, &jwk.e) else {
            continue;
        };
        let key = DecodingKey::from_rsa_components(n, e)
            .with_context(|| format!("invalid RSA components for kid '{kid}'"))?;
        out.insert(kid.clone(), key);
    }
    anyhow::ensure!(!out.is_empty(), "JWKS document contained no usable RSA keys");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rsa_keys_and_skips_the_rest() {
        let doc: JwksDocument = serde_json::from_str(
            r#"{
              "keys": [
                {"kty": "RSA", "kid": "key-1", "n": "sXchZvVrTvBdQhQyCW", "e": "AQAB"},
                {"kty": "EC",  "kid": "key-2"},
                {"kty": "RSA", "kid": "key-3", "n": "uFfiopMNJK", "e": "AQAB"}
              ]
            }"#,
        )
        .unwrap();

        let keys = parse_jwks(&doc).unwrap();
        assert!(keys.contains_key("key-1"));
        assert!(keys.contains_key("key-3"));
        assert!(!keys.contains_key("key-2"));
    }

    #[test]
    fn empty_document_is_an_error() {
        let doc: JwksDocument = serde_json::from_str(r#"{"keys": []}"#).unwrap();
        assert!(parse_jwks(&doc).is_err());
    }
}
