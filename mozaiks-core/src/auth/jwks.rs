//! Bounded JWKS key cache for external auth mode.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::DecodingKey;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;

use super::AuthError;

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    jwks_uri: String,
}

/// Fetches and caches OIDC signing keys.
///
/// Keys are refreshed at most once per `refresh_interval`, and eagerly
/// when a token references a `kid` that is not cached (key rotation).
pub struct JwksCache {
    http: reqwest::Client,
    discovery_url: Option<String>,
    explicit_jwks_url: Option<String>,
    resolved_jwks_url: RwLock<Option<String>>,
    keys: RwLock<HashMap<String, DecodingKey>>,
    last_refresh: Mutex<Option<Instant>>,
    refresh_interval: Duration,
}

impl JwksCache {
    pub fn new(
        discovery_url: Option<String>,
        jwks_url: Option<String>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            discovery_url,
            explicit_jwks_url: jwks_url,
            resolved_jwks_url: RwLock::new(None),
            keys: RwLock::new(HashMap::new()),
            last_refresh: Mutex::new(None),
            refresh_interval,
        }
    }

    /// Look up the decoding key for a `kid`, refreshing the set if the
    /// key is unknown and the refresh interval allows it.
    pub async fn key_for(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        if let Some(key) = self.keys.read().get(kid) {
            return Ok(key.clone());
        }

        if self.refresh_due() {
            self.refresh().await?;
            if let Some(key) = self.keys.read().get(kid) {
                return Ok(key.clone());
            }
        }

        Err(AuthError::KeyNotFound(kid.to_string()))
    }

    fn refresh_due(&self) -> bool {
        let last = self.last_refresh.lock();
        match *last {
            Some(at) => at.elapsed() >= self.refresh_interval,
            None => true,
        }
    }

    async fn refresh(&self) -> Result<(), AuthError> {
        let url = self.jwks_url().await?;
        let jwks: JwkSet = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AuthError::Jwks(e.to_string()))?
            .error_for_status()
            .map_err(|e| AuthError::Jwks(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::Jwks(e.to_string()))?;

        let mut keys = HashMap::new();
        for jwk in &jwks.keys {
            let Some(kid) = jwk.common.key_id.clone() else {
                continue;
            };
            if let Ok(key) = DecodingKey::from_jwk(jwk) {
                keys.insert(kid, key);
            }
        }

        *self.keys.write() = keys;
        *self.last_refresh.lock() = Some(Instant::now());
        Ok(())
    }

    async fn jwks_url(&self) -> Result<String, AuthError> {
        if let Some(url) = &self.explicit_jwks_url {
            return Ok(url.clone());
        }
        if let Some(url) = self.resolved_jwks_url.read().clone() {
            return Ok(url);
        }

        let discovery_url = self
            .discovery_url
            .as_ref()
            .ok_or_else(|| AuthError::Config("no JWKS URL or OIDC discovery URL".to_string()))?;

        let doc: DiscoveryDocument = self
            .http
            .get(discovery_url)
            .send()
            .await
            .map_err(|e| AuthError::Jwks(e.to_string()))?
            .error_for_status()
            .map_err(|e| AuthError::Jwks(e.to_string()))?
            .json()
            .await
            .map_err(|e| AuthError::Jwks(e.to_string()))?;

        *self.resolved_jwks_url.write() = Some(doc.jwks_uri.clone());
        Ok(doc.jwks_uri)
    }
}
