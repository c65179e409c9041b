// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Publish tokens: short-lived (<=30min) HMAC-signed JWTs scoped to exactly
//! one session id. Stateless — revocation is implicit via short expiry and
//! `sid` scoping, never via a revocation list.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ManagerError;

pub const MAX_TTL_SECS: i64 = 30 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishClaims {
    /// Session id this token is scoped to.
    pub sid: Uuid,
    pub scopes: Vec<String>,
    pub iat: i64,
    pub exp: i64,
}

pub struct PublishTokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl PublishTokenIssuer {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Mint a publish token scoped to `session_id` with the given scopes,
    /// capped at [`MAX_TTL_SECS`] regardless of requested TTL.
    pub fn mint(
        &self,
        session_id: Uuid,
        scopes: &[&str],
        ttl_secs: i64,
    ) -> Result<(String, PublishClaims), ManagerError> {
        let ttl_secs = ttl_secs.clamp(1, MAX_TTL_SECS);
        let now = chrono::Utc::now().timestamp();
        let claims = PublishClaims {
            sid: session_id,
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            iat: now,
            exp: now + ttl_secs,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| {
                tracing::error!(err = %e, "publish token signing failed");
                ManagerError::Internal
            })?;

        Ok((token, claims))
    }

    /// Verify a publish token and require its `sid` to equal `route_session_id`.
    /// Verification is strict even under `AUTH_BYPASS`, which only exempts
    /// user-JWT verification (§4.5).
    pub fn verify(
        &self,
        token: &str,
        route_session_id: Uuid,
    ) -> Result<PublishClaims, ManagerError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.required_spec_claims.clear();

        let data = decode::<PublishClaims>(token, &self.decoding_key, &validation)
            .map_err(|_| ManagerError::Unauthorized)?;

        if data.claims.sid != route_session_id {
            return Err(ManagerError::Forbidden);
        }

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_and_verify_roundtrip() {
        let issuer = PublishTokenIssuer::new("test-secret");
        let sid = Uuid::new_v4();
        let (token, claims) = issuer.mint(sid, &["state:publish", "attach:own"], 600).unwrap();
        assert_eq!(claims.sid, sid);

        let verified = issuer.verify(&token, sid).unwrap();
        assert_eq!(verified.sid, sid);
        assert_eq!(verified.scopes, vec!["state:publish", "attach:own"]);
    }

    #[test]
    fn verify_rejects_foreign_sid() {
        let issuer = PublishTokenIssuer::new("test-secret");
        let sid = Uuid::new_v4();
        let other = Uuid::new_v4();
        let (token, _) = issuer.mint(sid, &["state:publish"], 600).unwrap();

        let err = issuer.verify(&token, other).unwrap_err();
        assert_eq!(err, ManagerError::Forbidden);
    }

    #[test]
    fn mint_clamps_ttl_to_max() {
        let issuer = PublishTokenIssuer::new("test-secret");
        let sid = Uuid::new_v4();
        let (_, claims) = issuer.mint(sid, &[], 999_999).unwrap();
        assert!(claims.exp - claims.iat <= MAX_TTL_SECS);
    }
}
