// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;

use crate::auth::Principal;
use crate::error::ManagerError;
use crate::state::AppState;

const EXEMPT_PATHS: &[&str] = &["/healthz", "/readyz", "/metrics"];

/// Resolve the caller's bearer token into a [`Principal`]. A publish token
/// is tried first (its `sid` must match the `:id` path segment, if present);
/// otherwise the token is verified as a user JWT. The two paths are never
/// merged into one principal type (§4.5, §9).
pub async fn auth_layer(
    State(state): State<Arc<AppState>>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path().to_owned();
    if EXEMPT_PATHS.contains(&path.as_str()) {
        return next.run(req).await;
    }

    let token = match req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        Some(t) => t.to_owned(),
        None => return unauthorized("missing bearer token"),
    };

    let route_session_id = extract_path_session_id(&path);

    let principal = if let Some(sid) = route_session_id {
        match state.publish_tokens.verify(&token, sid) {
            Ok(claims) => Some(Principal::Harness { session_id: claims.sid }),
            Err(ManagerError::Forbidden) => return forbidden("publish token scoped to another session"),
            Err(_) => None,
        }
    } else {
        None
    };

    let principal = match principal {
        Some(p) => p,
        None => match state.jwt_verifier.verify(&token).await {
            Ok(claims) => Principal::User { subject: claims.sub },
            Err(e) => return e.to_http_response("invalid bearer token").into_response(),
        },
    };

    req.extensions_mut().insert(principal);
    next.run(req).await
}

/// Extract a UUID from a `/sessions/:id/...` or `/fastpath/sessions/:id/...`
/// style path, used to scope publish-token verification before the route's
/// own extractor runs.
fn extract_path_session_id(path: &str) -> Option<uuid::Uuid> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    for window in segments.windows(2) {
        if window[0] == "sessions" {
            if let Ok(id) = uuid::Uuid::parse_str(window[1]) {
                return Some(id);
            }
        }
    }
    None
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(ManagerError::Unauthorized.to_error_body(message))).into_response()
}

fn forbidden(message: &str) -> Response {
    (StatusCode::FORBIDDEN, Json(ManagerError::Forbidden.to_error_body(message))).into_response()
}
