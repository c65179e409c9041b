// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User JWT verification against a JWKS cache. A single read-mostly map with
//! periodic refresh: writers take a brief exclusive lock, readers take
//! shared locks (§5 shared resource policy).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::ManagerError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserClaims {
    pub sub: String,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
    pub exp: i64,
}

#[derive(Debug, Deserialize)]
struct Jwks {
    keys: Vec<JwkKey>,
}

#[derive(Debug, Deserialize, Clone)]
struct JwkKey {
    kid: String,
    n: String,
    e: String,
}

/// Verifies inbound user JWTs. Holds a periodically refreshed JWKS cache and
/// the expected issuer/audience.
pub struct JwtVerifier {
    jwks_url: Option<String>,
    issuer: Option<String>,
    audience: Option<String>,
    auth_bypass: bool,
    client: reqwest::Client,
    cache: RwLock<HashMap<String, DecodingKey>>,
}

impl JwtVerifier {
    pub fn new(
        jwks_url: Option<String>,
        issuer: Option<String>,
        audience: Option<String>,
        auth_bypass: bool,
    ) -> Self {
        Self {
            jwks_url,
            issuer,
            audience,
            auth_bypass,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Refresh the JWKS cache from `jwks_url`. Callers run this on a timer;
    /// a failed refresh leaves the existing cache in place.
    pub async fn refresh(&self) -> Result<(), ManagerError> {
        let Some(ref url) = self.jwks_url else { return Ok(()) };

        let resp = self.client.get(url).send().await.map_err(|e| {
            tracing::warn!(err = %e, "jwks fetch failed");
            ManagerError::Unavailable
        })?;

        let jwks: Jwks = resp.json().await.map_err(|e| {
            tracing::warn!(err = %e, "jwks body invalid");
            ManagerError::Unavailable
        })?;

        let mut next = HashMap::new();
        for key in jwks.keys {
            match DecodingKey::from_rsa_components(&key.n, &key.e) {
                Ok(dk) => {
                    next.insert(key.kid, dk);
                }
                Err(e) => tracing::warn!(kid = %key.kid, err = %e, "skipping malformed jwk"),
            }
        }

        *self.cache.write().await = next;
        Ok(())
    }

    pub async fn verify(&self, token: &str) -> Result<UserClaims, ManagerError> {
        if self.auth_bypass {
            return Ok(UserClaims {
                sub: "dev-bypass".to_owned(),
                iss: self.issuer.clone(),
                aud: self.audience.clone().map(serde_json::Value::String),
                exp: chrono::Utc::now().timestamp() + 3600,
            });
        }

        let header = decode_header(token).map_err(|_| ManagerError::Unauthorized)?;
        let kid = header.kid.ok_or(ManagerError::Unauthorized)?;

        let cache = self.cache.read().await;
        let key = cache.get(&kid).ok_or(ManagerError::Unauthorized)?;

        let mut validation = Validation::new(Algorithm::RS256);
        if let Some(ref iss) = self.issuer {
            validation.set_issuer(&[iss]);
        }
        if let Some(ref aud) = self.audience {
            validation.set_audience(&[aud]);
        }

        let data = decode::<UserClaims>(token, key, &validation)
            .map_err(|_| ManagerError::Unauthorized)?;

        Ok(data.claims)
    }
}

/// Spawn the JWKS periodic-refresh loop.
pub fn spawn_jwks_refresh(
    verifier: Arc<JwtVerifier>,
    interval: Duration,
    shutdown: tokio_util::sync::CancellationToken,
) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            if let Err(e) = verifier.refresh().await {
                tracing::warn!(err = %e, "jwks refresh failed, keeping stale cache");
            }
        }
    });
}
