// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ambient operational surface: liveness, readiness, and prometheus metrics.
//! Exempt from the auth middleware (see [`crate::auth::middleware::EXEMPT_PATHS`]).

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;

use crate::state::AppState;

/// `GET /healthz` — unconditional liveness: the process is scheduling tasks.
pub async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

/// `GET /readyz` — the database and brokered stream are both reachable.
pub async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if let Err(e) = sqlx::query("SELECT 1").execute(&state.db).await {
        tracing::warn!(err = %e, "readyz: database unreachable");
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    if let Err(e) = state.broker.health_check().await {
        tracing::warn!(err = %e, "readyz: broker unreachable");
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    StatusCode::OK
}

/// `GET /metrics` — prometheus text exposition format.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        Err(e) => {
            tracing::error!(err = %e, "metrics encode failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
