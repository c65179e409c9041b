// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::audit::AuditService;
use crate::auth::publish_token::PublishTokenIssuer;
use crate::error::ManagerError;
use crate::lease::manager::LeaseManager;
use crate::session::registry::{AttachOwnedOutcome, SessionRegistry};
use crate::session::Session;

/// Scopes granted to the idle publish token minted on attach. A session not
/// yet bound to a controller lease may still publish state/health and
/// request its own re-attach.
const IDLE_SCOPES: &[&str] = &["state:publish", "health:publish", "attach:own"];

/// TTL of the bootstrap controller lease handed to the host itself
/// (`controller_token`), distinct from any lease a human controller later
/// acquires over HTTP. Kept long relative to action leases since it exists
/// only to let the host accept its own auto-attach callback.
const BOOTSTRAP_LEASE_TTL: chrono::Duration = chrono::Duration::hours(24);

/// Re-dispatch once the previously-minted idle publish token is within this
/// margin of expiring, so the host always holds a live token.
const ROTATION_MARGIN_SECS: i64 = 5 * 60;

#[derive(Debug, Clone, Serialize)]
pub struct ControllerAutoAttach {
    pub private_beach_id: String,
    pub attach_code: Option<String>,
    pub manager_url: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IdlePublishToken {
    pub token: String,
    pub expires_at_ms: i64,
    pub scopes: Vec<String>,
}

/// The single JSON object the host receives on its control channel (§4.3).
/// The host is expected to use these fields exclusively; no environment
/// configuration is assumed on its side.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerHandshake {
    pub private_beach_id: String,
    pub manager_url: String,
    pub controller_token: Uuid,
    pub controller_auto_attach: ControllerAutoAttach,
    pub idle_publish_token: IdlePublishToken,
}

struct Mailbox {
    private_beach_id: String,
    handshake: ManagerHandshake,
}

pub struct HandshakeCoordinator {
    sessions: Arc<SessionRegistry>,
    leases: Arc<LeaseManager>,
    publish_tokens: Arc<PublishTokenIssuer>,
    audit: Arc<AuditService>,
    manager_url: String,
    mailbox: RwLock<HashMap<Uuid, Mailbox>>,
}

impl HandshakeCoordinator {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        leases: Arc<LeaseManager>,
        publish_tokens: Arc<PublishTokenIssuer>,
        audit: Arc<AuditService>,
        manager_url: String,
    ) -> Self {
        Self {
            sessions,
            leases,
            publish_tokens,
            audit,
            manager_url,
            mailbox: RwLock::new(HashMap::new()),
        }
    }

    /// Attach by join code, then dispatch the handshake payload the host
    /// will pick up on its next `GET /sessions/:id/handshake`.
    pub async fn attach_by_code(
        &self,
        private_beach_id: &str,
        session_id: Uuid,
        code: &str,
        requester: &str,
    ) -> Result<Session, ManagerError> {
        let session = self.sessions.attach_by_code(private_beach_id, session_id, code, requester).await?;
        self.dispatch(private_beach_id, session_id, Some(code.to_owned())).await?;
        Ok(session)
    }

    /// Attach by prior ownership (no join code). Dispatches a handshake to
    /// every requested id regardless of whether it was newly attached or
    /// already bound, since a reconnecting host still needs a live token.
    pub async fn attach_owned(
        &self,
        private_beach_id: &str,
        session_ids: &[Uuid],
        requester: &str,
    ) -> Result<AttachOwnedOutcome, ManagerError> {
        let outcome = self.sessions.attach_owned(private_beach_id, session_ids, requester).await?;

        for &session_id in session_ids {
            if let Err(e) = self.dispatch(private_beach_id, session_id, None).await {
                tracing::warn!(err = ?e, session_id = %session_id, "handshake dispatch failed after attach_owned");
            }
        }

        Ok(outcome)
    }

    /// The host's rendezvous point: returns the most recently dispatched
    /// handshake, if any has been produced for this session.
    pub async fn fetch(&self, session_id: Uuid) -> Option<ManagerHandshake> {
        self.mailbox.read().await.get(&session_id).map(|m| m.handshake.clone())
    }

    /// Mints a fresh bootstrap lease and idle publish token and stores the
    /// resulting handshake for pickup. Called on every attach and again by
    /// the rotation sweeper as the previous token nears expiry.
    async fn dispatch(
        &self,
        private_beach_id: &str,
        session_id: Uuid,
        attach_code: Option<String>,
    ) -> Result<(), ManagerError> {
        let lease = self
            .leases
            .acquire(session_id, "system:auto-attach", BOOTSTRAP_LEASE_TTL, Some("auto_attach_bootstrap"))
            .await?;

        let (token, claims) = self.publish_tokens.mint(session_id, IDLE_SCOPES, crate::auth::publish_token::MAX_TTL_SECS)?;

        let now = Utc::now();
        let handshake = ManagerHandshake {
            private_beach_id: private_beach_id.to_owned(),
            manager_url: self.manager_url.clone(),
            controller_token: lease.id,
            controller_auto_attach: ControllerAutoAttach {
                private_beach_id: private_beach_id.to_owned(),
                attach_code,
                manager_url: self.manager_url.clone(),
                issued_at: now,
                expires_at: Some(lease.expires_at),
            },
            idle_publish_token: IdlePublishToken {
                token,
                expires_at_ms: claims.exp * 1000,
                scopes: claims.scopes,
            },
        };

        self.mailbox.write().await.insert(
            session_id,
            Mailbox { private_beach_id: private_beach_id.to_owned(), handshake },
        );

        Ok(())
    }

    /// Re-dispatches every mailbox entry whose idle publish token is within
    /// [`ROTATION_MARGIN_SECS`] of expiry. Entries with no mailbox yet (a
    /// session that registered but never attached) are untouched.
    pub async fn rotate_expiring(&self) -> usize {
        let due: Vec<(Uuid, String)> = {
            let mailbox = self.mailbox.read().await;
            let cutoff = Utc::now().timestamp() + ROTATION_MARGIN_SECS;
            mailbox
                .iter()
                .filter(|(_, m)| m.handshake.idle_publish_token.expires_at_ms / 1000 <= cutoff)
                .map(|(id, m)| (*id, m.private_beach_id.clone()))
                .collect()
        };

        let mut rotated = 0;
        for (session_id, private_beach_id) in due {
            match self.dispatch(&private_beach_id, session_id, None).await {
                Ok(()) => rotated += 1,
                Err(e) => tracing::warn!(err = ?e, session_id = %session_id, "handshake rotation failed"),
            }
        }
        rotated
    }
}
