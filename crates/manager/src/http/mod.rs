// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP surface: one handler module per external collaborator (spec §6),
//! assembled into a flat axum route table the way the teacher's
//! `transport::build_router` assembles its own, with the same
//! auth-middleware-plus-CORS layering.

pub mod beaches;
pub mod fastpath;
pub mod ops;
pub mod sessions;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::middleware::auth_layer;
use crate::state::AppState;

/// Build the full axum `Router` for the Manager (spec §6's table, plus the
/// ambient `/metrics`, `/healthz`, `/readyz` surface).
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/sessions/register", post(sessions::register))
        .route(
            "/sessions/{id}/controller/lease",
            post(sessions::acquire_lease).delete(sessions::release_lease),
        )
        .route("/sessions/{id}/actions", post(sessions::queue_actions))
        .route("/sessions/{id}/actions/poll", get(sessions::poll_actions))
        .route("/sessions/{id}/actions/ack", post(sessions::ack_actions))
        .route("/sessions/{id}/actions/pending", get(sessions::pending))
        .route("/sessions/{id}/state", post(sessions::publish_state))
        .route("/sessions/{id}/health", post(sessions::publish_health))
        .route("/sessions/{id}/controller-events", get(sessions::controller_events))
        .route("/sessions/{id}/handshake", get(sessions::handshake))
        .route(
            "/private-beaches/{id}/sessions/attach-by-code",
            post(beaches::attach_by_code),
        )
        .route("/private-beaches/{id}/sessions/attach", post(beaches::attach_owned))
        .route("/private-beaches/{id}/sessions", get(beaches::list_sessions))
        .route("/fastpath/sessions/{id}/webrtc/offer", post(fastpath::offer))
        .route(
            "/fastpath/sessions/{id}/webrtc/ice",
            post(fastpath::add_ice_candidate).get(fastpath::drain_ice_candidates),
        )
        .route("/metrics", get(ops::metrics))
        .route("/healthz", get(ops::healthz))
        .route("/readyz", get(ops::readyz))
        .layer(middleware::from_fn_with_state(state.clone(), auth_layer))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
