// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWKS (JSON Web Key Set) fetching and caching for external OIDC providers.
//!
//! ## Security
//!
//! - Keys are cached with a configurable TTL
//! - An unknown `kid` triggers one forced refresh (key rotation at the provider),
//!   at most once per [`DEFAULT_FORCED_REFRESH_INTERVAL`]
//! - Stale cache is used on fetch failure
//!
//! Fetch failures surface as `ExternalProviderUnreachable`; keys that do not
//! match surface as `ExternalTokenInvalid`.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::RwLock;

use super::error::AuthError;

/// Default JWKS cache TTL (5 minutes).
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Minimum spacing between refreshes forced by an unknown `kid`.
pub const DEFAULT_FORCED_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// JWKS cache entry.
struct CacheEntry {
    jwks: JwkSet,
    fetched_at: Instant,
}

/// Where the key set comes from.
#[derive(Clone)]
enum KeySource {
    Remote { url: String, client: reqwest::Client },
    Static,
}

/// JWKS manager with caching.
#[derive(Clone)]
pub struct JwksManager {
    source: KeySource,
    /// Cache TTL
    cache_ttl: Duration,
    /// Cached JWKS
    cache: Arc<RwLock<Option<CacheEntry>>>,
    forced_refresh_interval: Duration,
    last_forced_refresh: Arc<Mutex<Option<Instant>>>,
}

impl JwksManager {
    /// Create a manager fetching from `jwks_url` with the given HTTP client.
    ///
    /// The client's timeout bounds every fetch.
    pub fn new(jwks_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            source: KeySource::Remote {
                url: jwks_url.into(),
                client,
            },
            cache_ttl: DEFAULT_CACHE_TTL,
            cache: Arc::new(RwLock::new(None)),
            forced_refresh_interval: DEFAULT_FORCED_REFRESH_INTERVAL,
            last_forced_refresh: Arc::new(Mutex::new(None)),
        }
    }

    /// Create a manager over a fixed key set (no network).
    pub fn with_static_keys(jwks: JwkSet) -> Self {
        Self {
            source: KeySource::Static,
            cache_ttl: Duration::MAX,
            cache: Arc::new(RwLock::new(Some(CacheEntry {
                jwks,
                fetched_at: Instant::now(),
            }))),
            forced_refresh_interval: DEFAULT_FORCED_REFRESH_INTERVAL,
            last_forced_refresh: Arc::new(Mutex::new(None)),
        }
    }

    /// Create with custom cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Minimum spacing between refreshes forced by an unknown `kid`.
    pub fn with_forced_refresh_interval(mut self, interval: Duration) -> Self {
        self.forced_refresh_interval = interval;
        self
    }

    /// Reserve the forced-refresh slot; false while the previous one is too recent.
    fn try_begin_forced_refresh(&self) -> bool {
        let mut last = self
            .last_forced_refresh
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match *last {
            Some(at) if at.elapsed() < self.forced_refresh_interval => false,
            _ => {
                *last = Some(Instant::now());
                true
            }
        }
    }

    /// Get the JWKS URL, if keys are fetched remotely.
    pub fn jwks_url(&self) -> Option<&str> {
        match &self.source {
            KeySource::Remote { url, .. } => Some(url),
            KeySource::Static => None,
        }
    }

    /// Fetch JWKS (with caching).
    async fn get_jwks(&self) -> Result<JwkSet, AuthError> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = &*cache {
                if entry.fetched_at.elapsed() < self.cache_ttl {
                    return Ok(entry.jwks.clone());
                }
            }
        }

        match self.fetch_jwks().await {
            Ok(jwks) => {
                let mut cache = self.cache.write().await;
                *cache = Some(CacheEntry {
                    jwks: jwks.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(jwks)
            }
            Err(err) => {
                let cache = self.cache.read().await;
                if let Some(entry) = &*cache {
                    tracing::warn!(error = %err, "JWKS refresh failed; using stale keys");
                    return Ok(entry.jwks.clone());
                }
                Err(err)
            }
        }
    }

    /// Fetch JWKS from the endpoint.
    async fn fetch_jwks(&self) -> Result<JwkSet, AuthError> {
        let KeySource::Remote { url, client } = &self.source else {
            let cache = self.cache.read().await;
            return cache
                .as_ref()
                .map(|entry| entry.jwks.clone())
                .ok_or_else(|| AuthError::Internal("static key set is empty".to_string()));
        };

        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| AuthError::ExternalProviderUnreachable(format!("JWKS fetch: {e}")))?;

        if !response.status().is_success() {
            return Err(AuthError::ExternalProviderUnreachable(format!(
                "HTTP {} from JWKS endpoint",
                response.status()
            )));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| AuthError::ExternalProviderUnreachable(format!("JWKS body: {e}")))
    }

    /// Get a decoding key for the given key ID.
    ///
    /// An unknown `kid` forces one refresh before giving up, unless another
    /// forced refresh happened within the forced-refresh interval.
    pub async fn get_decoding_key(&self, kid: &str) -> Result<(DecodingKey, Algorithm), AuthError> {
        let jwks = self.get_jwks().await?;
        if let Some(jwk) = jwks.find(kid) {
            return jwk_to_decoding_key(jwk);
        }

        if matches!(self.source, KeySource::Remote { .. }) && self.try_begin_forced_refresh() {
            tracing::debug!(kid = %kid, "Unknown kid; refreshing JWKS");
            self.refresh().await?;
            let jwks = self.get_jwks().await?;
            if let Some(jwk) = jwks.find(kid) {
                return jwk_to_decoding_key(jwk);
            }
        }

        Err(AuthError::ExternalTokenInvalid(format!("no key matches kid '{kid}'")))
    }

    /// Get any valid decoding key (for tokens without kid).
    pub async fn get_any_decoding_key(&self) -> Result<(DecodingKey, Algorithm), AuthError> {
        let jwks = self.get_jwks().await?;
        for jwk in &jwks.keys {
            if let Ok(result) = jwk_to_decoding_key(jwk) {
                return Ok(result);
            }
        }
        Err(AuthError::ExternalTokenInvalid("no usable key in JWKS".to_string()))
    }

    /// Force refresh the JWKS cache.
    pub async fn refresh(&self) -> Result<(), AuthError> {
        let jwks = self.fetch_jwks().await?;
        let mut cache = self.cache.write().await;
        *cache = Some(CacheEntry {
            jwks,
            fetched_at: Instant::now(),
        });
        Ok(())
    }

    /// Check if JWKS is currently cached and valid.
    pub async fn is_cached(&self) -> bool {
        let cache = self.cache.read().await;
        if let Some(entry) = &*cache {
            entry.fetched_at.elapsed() < self.cache_ttl
        } else {
            false
        }
    }
}

/// Convert a JWK to a DecodingKey.
fn jwk_to_decoding_key(jwk: &Jwk) -> Result<(DecodingKey, Algorithm), AuthError> {
    let key = DecodingKey::from_jwk(jwk)
        .map_err(|e| AuthError::ExternalTokenInvalid(format!("unusable JWK: {e}")))?;

    let alg = match (&jwk.algorithm, jwk.common.key_algorithm) {
        (AlgorithmParameters::RSA(_), Some(KeyAlgorithm::RS384)) => Algorithm::RS384,
        (AlgorithmParameters::RSA(_), Some(KeyAlgorithm::RS512)) => Algorithm::RS512,
        (AlgorithmParameters::RSA(_), Some(KeyAlgorithm::PS256)) => Algorithm::PS256,
        (AlgorithmParameters::RSA(_), _) => Algorithm::RS256,
        (AlgorithmParameters::EllipticCurve(_), Some(KeyAlgorithm::ES384)) => Algorithm::ES384,
        (AlgorithmParameters::EllipticCurve(_), _) => Algorithm::ES256,
        (AlgorithmParameters::OctetKey(_), Some(KeyAlgorithm::HS384)) => Algorithm::HS384,
        (AlgorithmParameters::OctetKey(_), Some(KeyAlgorithm::HS512)) => Algorithm::HS512,
        (AlgorithmParameters::OctetKey(_), _) => Algorithm::HS256,
        _ => {
            return Err(AuthError::ExternalTokenInvalid(
                "unsupported key type in JWKS".to_string(),
            ))
        }
    };
    Ok((key, alg))
}
