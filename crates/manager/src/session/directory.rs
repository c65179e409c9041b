// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The external session directory: the identity provider's verify-code and
//! verify-ownership endpoints, modeled as a narrow trait so tests can
//! substitute a fake instead of reaching across the network.

use async_trait::async_trait;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryError {
    /// The directory rejected the request: invalid code, or the requester
    /// does not own the session. Permanent — retrying will not help.
    Invalid,
    /// The directory could not be reached or returned a server error.
    /// Retryable.
    Unreachable,
}

#[async_trait]
pub trait SessionDirectory: Send + Sync {
    /// Verify a short attach-by-code claim for `session_id`.
    async fn verify_code(&self, session_id: Uuid, code: &str) -> Result<bool, DirectoryError>;

    /// Verify that `requester` owns `session_id` (attach-by-ownership).
    async fn verify_ownership(
        &self,
        session_id: Uuid,
        requester: &str,
    ) -> Result<bool, DirectoryError>;
}

/// HTTP-backed implementation of [`SessionDirectory`].
pub struct HttpSessionDirectory {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSessionDirectory {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(5))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

#[async_trait]
impl SessionDirectory for HttpSessionDirectory {
    async fn verify_code(&self, session_id: Uuid, code: &str) -> Result<bool, DirectoryError> {
        let url = format!("{}/sessions/{session_id}/verify-code", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "code": code }))
            .send()
            .await
            .map_err(|_| DirectoryError::Unreachable)?;

        match resp.status().as_u16() {
            200..=299 => Ok(true),
            400..=499 => Ok(false),
            _ => Err(DirectoryError::Unreachable),
        }
    }

    async fn verify_ownership(
        &self,
        session_id: Uuid,
        requester: &str,
    ) -> Result<bool, DirectoryError> {
        let url = format!("{}/sessions/{session_id}/verify-ownership", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "requester": requester }))
            .send()
            .await
            .map_err(|_| DirectoryError::Unreachable)?;

        match resp.status().as_u16() {
            200..=299 => Ok(true),
            400..=499 => Ok(false),
            _ => Err(DirectoryError::Unreachable),
        }
    }
}

#[cfg(test)]
pub struct FakeSessionDirectory {
    pub valid_codes: std::collections::HashMap<Uuid, String>,
    pub owners: std::collections::HashMap<Uuid, String>,
}

#[cfg(test)]
#[async_trait]
impl SessionDirectory for FakeSessionDirectory {
    async fn verify_code(&self, session_id: Uuid, code: &str) -> Result<bool, DirectoryError> {
        Ok(self.valid_codes.get(&session_id).map(|c| c == code).unwrap_or(false))
    }

    async fn verify_ownership(
        &self,
        session_id: Uuid,
        requester: &str,
    ) -> Result<bool, DirectoryError> {
        Ok(self.owners.get(&session_id).map(|o| o == requester).unwrap_or(false))
    }
}
