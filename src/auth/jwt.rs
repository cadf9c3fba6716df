//! Managed JWT verification against an OIDC issuer's JWKS.
//!
//! Access tokens are RS256-signed; the signing key is selected by the
//! header `kid` from a cached JWKS document.  An unknown `kid` forces one
//! refresh before the token is rejected.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use super::{TokenVerifier, VerifiedClaims};
use crate::config::JwtConfig;

#[derive(Debug, Error)]
pub enum JwksError {
    #[error("Failed to fetch JWKS: {0}")]
    Fetch(String),

    #[error("Failed to parse JWKS: {0}")]
    Parse(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Failed to convert key: {0}")]
    KeyConversion(String),
}

#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    #[serde(default)]
    n: String,
    #[serde(default)]
    e: String,
}

struct CachedKeys {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Instant,
}

/// Fetches and caches RSA signing keys from a JWKS endpoint.
pub struct JwksClient {
    url: String,
    http: reqwest::Client,
    cache: RwLock<Option<CachedKeys>>,
    ttl: Duration,
}

impl JwksClient {
    pub fn new(url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            url: url.into(),
            http: reqwest::Client::new(),
            cache: RwLock::new(None),
            ttl,
        }
    }

    /// Client whose cache already holds `keys`, for exercising verification
    /// without a JWKS endpoint.
    #[cfg(test)]
    fn with_cached_keys(
        url: impl Into<String>,
        ttl: Duration,
        keys: HashMap<String, DecodingKey>,
    ) -> Self {
        let client = Self::new(url, ttl);
        *client.cache.try_write().expect("fresh lock") = Some(CachedKeys {
            keys,
            fetched_at: Instant::now(),
        });
        client
    }

    pub async fn get_key(&self, kid: &str) -> Result<DecodingKey, JwksError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < self.ttl {
                    if let Some(key) = cached.keys.get(kid) {
                        return Ok(key.clone());
                    }
                }
            }
        }

        self.refresh().await?;

        let cache = self.cache.read().await;
        cache
            .as_ref()
            .and_then(|cached| cached.keys.get(kid).cloned())
            .ok_or_else(|| JwksError::KeyNotFound(kid.to_string()))
    }

    async fn refresh(&self) -> Result<(), JwksError> {
        debug!("Fetching JWKS from {}", self.url);
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| JwksError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(JwksError::Fetch(format!("HTTP {}", response.status())));
        }

        let document: JwksDocument = response
            .json()
            .await
            .map_err(|e| JwksError::Parse(e.to_string()))?;

        let keys = decoding_keys(document)?;
        *self.cache.write().await = Some(CachedKeys {
            keys,
            fetched_at: Instant::now(),
        });
        Ok(())
    }
}

fn decoding_keys(document: JwksDocument) -> Result<HashMap<String, DecodingKey>, JwksError> {
    let mut keys = HashMap::new();
    for jwk in document.keys.into_iter().filter(|k| k.kty == "RSA") {
        let key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
            .map_err(|e| JwksError::KeyConversion(e.to_string()))?;
        keys.insert(jwk.kid, key);
    }
    Ok(keys)
}

/// Claims read from an access token. `exp` and `iss` are enforced by
/// [`Validation`]; the rest are checked in [`JwtVerifier::check_claims`].
#[derive(Debug, Clone, Deserialize)]
struct AccessClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    token_use: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
}

pub struct JwtVerifier {
    issuer: String,
    client_id: Option<String>,
    token_use: Option<String>,
    jwks: JwksClient,
}

impl JwtVerifier {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            issuer: config.issuer.clone(),
            client_id: config.client_id.clone(),
            token_use: config.token_use.clone(),
            jwks: JwksClient::new(
                config.jwks_url(),
                Duration::from_secs(config.jwks_cache_seconds),
            ),
        }
    }

    fn check_claims(&self, claims: AccessClaims) -> anyhow::Result<VerifiedClaims> {
        if let Some(expected) = &self.token_use {
            if claims.token_use.as_deref() != Some(expected.as_str()) {
                anyhow::bail!("unexpected token_use {:?}", claims.token_use);
            }
        }
        if let Some(expected) = &self.client_id {
            if claims.client_id.as_deref() != Some(expected.as_str()) {
                anyhow::bail!("unexpected client_id {:?}", claims.client_id);
            }
        }
        Ok(VerifiedClaims {
            sub: claims.sub,
            username: claims.username,
        })
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(
        &self,
        token: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<VerifiedClaims>> + Send + '_>> {
        let token = token.to_string();
        Box::pin(async move {
            let header = decode_header(&token)?;
            if header.alg != Algorithm::RS256 {
                anyhow::bail!("unsupported algorithm {:?}", header.alg);
            }
            let kid = header
                .kid
                .ok_or_else(|| anyhow::anyhow!("token header has no kid"))?;
            let key = self.jwks.get_key(&kid).await?;

            let mut validation = Validation::new(Algorithm::RS256);
            validation.set_issuer(&[&self.issuer]);
            // Access tokens carry client_id instead of aud.
            validation.validate_aud = false;

            let data = decode::<AccessClaims>(&token, &key, &validation)?;
            self.check_claims(data.claims)
        })
    }
}
