// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handlers for the `/private-beaches/*` surface: attaching sessions to a
//! beach, and listing a beach's attached sessions.

use std::sync::Arc;

use axum::extract::{Extension, Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::Principal;
use crate::error::ManagerError;
use crate::session::Session;
use crate::state::AppState;

fn requester_of(principal: &Principal) -> String {
    match principal {
        Principal::User { subject } => subject.clone(),
        Principal::Harness { session_id } => format!("harness:{session_id}"),
    }
}

#[derive(Debug, Deserialize)]
pub struct AttachByCodeRequest {
    pub session_id: Uuid,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct AttachByCodeResponse {
    pub ok: bool,
    pub attach_method: &'static str,
    pub session: Session,
}

/// `POST /private-beaches/:id/sessions/attach-by-code`
pub async fn attach_by_code(
    State(state): State<Arc<AppState>>,
    Path(private_beach_id): Path<String>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<AttachByCodeRequest>,
) -> Result<impl IntoResponse, ManagerError> {
    let requester = requester_of(&principal);
    let session = state
        .handshake
        .attach_by_code(&private_beach_id, req.session_id, &req.code, &requester)
        .await?;
    Ok(Json(AttachByCodeResponse { ok: true, attach_method: "code", session }))
}

#[derive(Debug, Deserialize)]
pub struct AttachOwnedRequest {
    pub session_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct AttachOwnedResponse {
    pub attached_count: usize,
    pub duplicates: usize,
}

/// `POST /private-beaches/:id/sessions/attach`
pub async fn attach_owned(
    State(state): State<Arc<AppState>>,
    Path(private_beach_id): Path<String>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<AttachOwnedRequest>,
) -> Result<impl IntoResponse, ManagerError> {
    let requester = requester_of(&principal);
    let outcome = state.handshake.attach_owned(&private_beach_id, &req.session_ids, &requester).await?;
    Ok(Json(AttachOwnedResponse { attached_count: outcome.attached_count, duplicates: outcome.duplicates }))
}

/// `GET /private-beaches/:id/sessions`
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Path(private_beach_id): Path<String>,
) -> Result<impl IntoResponse, ManagerError> {
    let sessions: Vec<Session> = state.sessions.list(&private_beach_id).await?;
    Ok(Json(sessions))
}
