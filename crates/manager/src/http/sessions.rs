// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handlers for the `/sessions/*` surface (spec §6): register, lease
//! acquire/release, action queueing and polling, acks, state/health
//! publishing, the audit feed, and the handshake rendezvous.

use std::sync::Arc;

use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Principal;
use crate::error::ManagerError;
use crate::pipeline::{AckRecord, ActionCommand};
use crate::session::{HarnessKind, Session, TransportHints};
use crate::state::AppState;

fn requester_of(principal: &Principal) -> String {
    match principal {
        Principal::User { subject } => subject.clone(),
        Principal::Harness { session_id } => format!("harness:{session_id}"),
    }
}

// -- register -----------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub origin_session_id: String,
    #[serde(default)]
    pub private_beach_id: Option<String>,
    pub harness_kind: HarnessKind,
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub session: Session,
    pub transport_hints: TransportHints,
}

/// `POST /sessions/register`
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ManagerError> {
    let outcome = state
        .sessions
        .register(
            req.private_beach_id.as_deref(),
            &req.origin_session_id,
            req.harness_kind,
            req.capabilities,
            req.metadata,
        )
        .await?;

    Ok(Json(RegisterResponse { session: outcome.session, transport_hints: outcome.transport_hints }))
}

// -- controller lease -----------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AcquireLeaseRequest {
    #[serde(default = "default_lease_ttl_secs")]
    pub ttl_secs: i64,
    #[serde(default)]
    pub reason: Option<String>,
}

fn default_lease_ttl_secs() -> i64 {
    3600
}

#[derive(Debug, Deserialize)]
pub struct ReleaseLeaseRequest {
    pub lease_token: Uuid,
}

/// `POST /sessions/:id/controller/lease`
pub async fn acquire_lease(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<AcquireLeaseRequest>,
) -> Result<impl IntoResponse, ManagerError> {
    let requester = requester_of(&principal);
    let lease = state
        .leases
        .acquire(session_id, &requester, chrono::Duration::seconds(req.ttl_secs.max(1)), req.reason.as_deref())
        .await?;
    Ok(Json(lease))
}

/// `DELETE /sessions/:id/controller/lease`
pub async fn release_lease(
    State(state): State<Arc<AppState>>,
    Path(_session_id): Path<Uuid>,
    Json(req): Json<ReleaseLeaseRequest>,
) -> Result<impl IntoResponse, ManagerError> {
    state.leases.release(req.lease_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

// -- actions --------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct QueueActionsRequest {
    pub controller_token: Uuid,
    pub actions: Vec<ActionCommand>,
}

/// `POST /sessions/:id/actions`
pub async fn queue_actions(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<QueueActionsRequest>,
) -> Result<impl IntoResponse, ManagerError> {
    let session = state.sessions.get(session_id).await?;
    let private_beach_id = session.private_beach_id.clone().unwrap_or_default();

    let outcome = state
        .pipeline
        .queue_actions(session_id, req.controller_token, &private_beach_id, req.actions, &principal)
        .await?;

    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    #[serde(default = "default_poll_max")]
    pub max: usize,
}

fn default_poll_max() -> usize {
    50
}

/// `GET /sessions/:id/actions/poll` — HTTP fallback drain for hosts without
/// a fast-path channel. Marks the session as having an active HTTP poller so
/// the Command Gate can treat it as a substitute for an open data channel.
pub async fn poll_actions(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<PollQuery>,
) -> Result<impl IntoResponse, ManagerError> {
    state.pipeline.mark_polled(session_id).await;

    let session = state.sessions.get(session_id).await?;
    let private_beach_id = session.private_beach_id.clone().unwrap_or_default();

    let entries = state.broker.poll(&private_beach_id, session_id, query.max).await.map_err(|e| {
        tracing::error!(err = %e, session_id = %session_id, "broker poll failed");
        ManagerError::Unavailable
    })?;

    let actions: Vec<ActionCommand> = entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_slice::<ActionCommand>(&entry.payload) {
            Ok(action) => Some(action),
            Err(e) => {
                tracing::warn!(err = %e, session_id = %session_id, "malformed broker entry, skipping");
                None
            }
        })
        .collect();

    Ok(Json(actions))
}

#[derive(Debug, Deserialize)]
pub struct AckActionsRequest {
    pub acks: Vec<AckRecord>,
}

/// `POST /sessions/:id/actions/ack`
pub async fn ack_actions(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<AckActionsRequest>,
) -> Result<impl IntoResponse, ManagerError> {
    for ack in req.acks {
        state.pipeline.handle_ack(session_id, ack).await;
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct PendingResponse {
    pub depth: usize,
    pub lag: usize,
    pub fast_path_ready: bool,
    pub transport: &'static str,
}

/// `GET /sessions/:id/actions/pending`
pub async fn pending(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, ManagerError> {
    let session = state.sessions.get(session_id).await?;
    let depth = state.pipeline.pending_count(session_id).await;
    let fast_path_ready = state.fastpath.is_delivery_ready(session_id).await;
    let transport = match session.transport_mode {
        crate::session::TransportMode::FastPath => "fast_path",
        crate::session::TransportMode::HttpFallback => "http_fallback",
    };

    Ok(Json(PendingResponse { depth, lag: depth, fast_path_ready, transport }))
}

// -- state / health --------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct PublishStateRequest {
    #[serde(default)]
    pub snapshot_ref: Option<String>,
}

/// `POST /sessions/:id/state` — accepts a publish token scoped to this
/// session, or a user JWT.
pub async fn publish_state(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<PublishStateRequest>,
) -> Result<impl IntoResponse, ManagerError> {
    if !principal.may_act_on(session_id) {
        return Err(ManagerError::Forbidden);
    }
    state.sessions.update_runtime(session_id, Some(chrono::Utc::now()), req.snapshot_ref).await;
    Ok(StatusCode::ACCEPTED)
}

/// `POST /sessions/:id/health` — accepts a publish token scoped to this
/// session, or a user JWT.
pub async fn publish_health(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse, ManagerError> {
    if !principal.may_act_on(session_id) {
        return Err(ManagerError::Forbidden);
    }
    state.sessions.update_runtime(session_id, Some(chrono::Utc::now()), None).await;
    state.sessions.mark_offline(session_id, false).await;
    Ok(StatusCode::ACCEPTED)
}

// -- audit feed -------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ControllerEventsQuery {
    #[serde(default = "default_events_limit")]
    pub limit: i64,
    #[serde(default)]
    pub before: Option<chrono::DateTime<chrono::Utc>>,
}

fn default_events_limit() -> i64 {
    50
}

/// `GET /sessions/:id/controller-events` — paginated audit feed.
pub async fn controller_events(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<ControllerEventsQuery>,
) -> Result<impl IntoResponse, ManagerError> {
    let events = state
        .audit
        .list_for_session(session_id, query.limit.clamp(1, 500), query.before)
        .await
        .map_err(|e| {
            tracing::error!(err = %e, session_id = %session_id, "controller-events query failed");
            ManagerError::Unavailable
        })?;

    Ok(Json(events))
}

/// `GET /sessions/:id/handshake` — the host's one fixed rendezvous point for
/// picking up the `manager_handshake` payload (§4.5, `handshake::mod`).
pub async fn handshake(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, ManagerError> {
    match state.handshake.fetch(session_id).await {
        Some(payload) => Ok(Json(payload)),
        None => Err(ManagerError::SessionNotFound),
    }
}
