// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handlers for the `/fastpath/*` surface: SDP offer/answer exchange and
//! trickle-ICE candidate exchange for the manager-side WebRTC peer.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ManagerError;
use crate::fastpath::webrtc;
use crate::fastpath::IceCandidate;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct OfferRequest {
    pub sdp: String,
}

#[derive(Debug, Serialize)]
pub struct OfferResponse {
    pub sdp: String,
}

/// `POST /fastpath/sessions/:id/webrtc/offer` — begins a fresh manager-side
/// peer for this session, replacing any previous one (§4.4).
pub async fn offer(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<OfferRequest>,
) -> Result<impl IntoResponse, ManagerError> {
    // Confirm the session exists before spending a peer connection on it.
    state.sessions.get(session_id).await?;

    let session = state.fastpath.begin_offer(session_id).await;
    let answer_sdp = webrtc::handle_offer(
        session,
        &state.ice_config,
        &req.sdp,
        state.pipeline.clone(),
        state.sessions.clone(),
        state.metrics.clone(),
    )
    .await?;

    Ok(Json(OfferResponse { sdp: answer_sdp }))
}

#[derive(Debug, Deserialize)]
pub struct AddIceCandidateRequest {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default)]
    pub sdp_mline_index: Option<u32>,
}

/// `POST /fastpath/sessions/:id/webrtc/ice` — the host hands the manager one
/// of its own gathered candidates.
pub async fn add_ice_candidate(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<AddIceCandidateRequest>,
) -> Result<impl IntoResponse, ManagerError> {
    let session = state.fastpath.get(session_id).await.ok_or(ManagerError::FastPathNotReady)?;
    webrtc::add_ice_candidate(&session, &req.candidate, req.sdp_mid.as_deref(), req.sdp_mline_index).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// `GET /fastpath/sessions/:id/webrtc/ice` — the host's trickle-ICE poll for
/// candidates the manager has gathered since the last drain.
pub async fn drain_ice_candidates(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, ManagerError> {
    let session = state.fastpath.get(session_id).await.ok_or(ManagerError::FastPathNotReady)?;
    let candidates: Vec<IceCandidate> = session.drain_outbound_candidates().await;
    Ok(Json(candidates))
}
