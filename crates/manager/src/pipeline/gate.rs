// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command Gate: the ordered predicate table `queue_actions` runs a lease
//! token and target session through before a single action is sent or
//! enqueued (spec §4.3 "Command Gate (validation)"). A drop at any check
//! fails the whole batch — none of its actions are enqueued or sent — and
//! the check order below is load-bearing: a caller presenting an invalid
//! token always sees `missing_lease`/`target_mismatch` before anything that
//! depends on the target session's own state.
//!
//! "Pairing" (`session_not_bound`) is resolved here as: the validated
//! lease's `controller_account`, when present, must match the authenticated
//! principal's subject. A `None` `controller_account` is a harness
//! bootstrap lease and is bound to any harness principal scoped to the
//! session. This guards against a leaked lease token being replayed by a
//! different principal than the one that acquired it, without requiring
//! the cross-lease exclusion the lease model explicitly does not have.

use uuid::Uuid;

use crate::auth::Principal;
use crate::error::ManagerError;
use crate::fastpath::FastPathRegistry;
use crate::lease::manager::LeaseManager;
use crate::lease::ControllerLease;
use crate::session::registry::SessionRegistry;
use crate::session::{Session, TransportMode};

pub struct GateOutcome {
    pub lease: ControllerLease,
    pub session: Session,
}

pub struct CommandGate<'a> {
    pub leases: &'a LeaseManager,
    pub sessions: &'a SessionRegistry,
    pub fastpath: &'a FastPathRegistry,
}

impl<'a> CommandGate<'a> {
    pub fn new(
        leases: &'a LeaseManager,
        sessions: &'a SessionRegistry,
        fastpath: &'a FastPathRegistry,
    ) -> Self {
        Self { leases, sessions, fastpath }
    }

    /// Runs the six-check predicate table. `http_poller_active` reflects
    /// whether this session has polled `/actions/poll` recently enough to
    /// stand in for a dead fast-path channel (tracked by the caller, which
    /// owns the poll-recency window).
    ///
    /// `strict` is `CONTROLLER_STRICT_GATING`. The lease checks
    /// (`missing_lease`/`target_mismatch`) always enforce — they establish
    /// which credential is even being evaluated, and a bypass there would
    /// defeat bearer-token scoping entirely. The remaining four checks
    /// (`child_not_attached`, `fast_path_not_ready`, `session_not_bound`,
    /// `child_offline`) are skipped rather than enforced when `strict` is
    /// false, which is the "silently succeeding" behavior a disabled flag
    /// names.
    pub async fn evaluate(
        &self,
        lease_token: Uuid,
        target_session_id: Uuid,
        principal: &Principal,
        http_poller_active: bool,
        strict: bool,
    ) -> Result<GateOutcome, ManagerError> {
        // missing_lease / target_mismatch
        let lease = self.leases.validate(lease_token, target_session_id).await?;

        let session = self.sessions.get(target_session_id).await?;

        if strict {
            // child_not_attached
            if !session.is_attached() {
                return Err(ManagerError::ChildNotAttached);
            }

            // fast_path_not_ready
            if session.transport_mode == TransportMode::FastPath {
                let fast_path_ready = self.fastpath.is_delivery_ready(target_session_id).await;
                if !fast_path_ready && !http_poller_active {
                    return Err(ManagerError::FastPathNotReady);
                }
            }

            // session_not_bound (pairing)
            if let Some(controller_account) = &lease.controller_account {
                let bound = match principal {
                    Principal::User { subject } => subject == controller_account,
                    Principal::Harness { session_id } => *session_id == target_session_id,
                };
                if !bound {
                    return Err(ManagerError::SessionNotBound);
                }
            }

            // child_offline
            let runtime = self.sessions.runtime_snapshot(target_session_id).await;
            if runtime.offline {
                return Err(ManagerError::ChildOffline);
            }
        }

        Ok(GateOutcome { lease, session })
    }
}
