// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authentication: user JWTs verified against a JWKS cache, and
//! Manager-minted publish tokens verified against an HMAC secret. The two
//! are disjoint principals (§4.5, §9) — never merged into one type.

pub mod jwt;
pub mod middleware;
pub mod publish_token;

use uuid::Uuid;

/// The authenticated caller of a request. A publish-token caller ("harness")
/// may only act on its own `sid`; a user principal is bounded by beach
/// membership, checked at the handler level against `private_beach_id`.
#[derive(Debug, Clone)]
pub enum Principal {
    User { subject: String },
    Harness { session_id: Uuid },
}

impl Principal {
    /// `true` if this principal may act on behalf of `session_id`.
    pub fn may_act_on(&self, session_id: Uuid) -> bool {
        match self {
            Self::User { .. } => true,
            Self::Harness { session_id: sid } => *sid == session_id,
        }
    }
}
