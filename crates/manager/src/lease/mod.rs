// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Controller lease state machine: acquire, renew, release, revoke, validate.

pub mod manager;
pub mod sweeper;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerLease {
    pub id: Uuid,
    pub session_id: Uuid,
    pub controller_account: Option<String>,
    pub issuing_account: String,
    pub issued_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub reason: Option<String>,
    pub revoked_at: Option<chrono::DateTime<chrono::Utc>>,
    pub expired_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ControllerLease {
    pub fn is_live(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }

    /// Opaque bearer token: the lease id itself. The Manager never accepts
    /// JWT leases (spec §4.2 algorithm notes).
    pub fn token(&self) -> Uuid {
        self.id
    }
}
