// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes surfaced by the Manager's HTTP API.
///
/// Mirrors the taxonomy of authentication, authorization, gate-drop,
/// not-found, infrastructure, and protocol errors. Gate-drop variants carry
/// the exact drop reason strings emitted by the Command Gate so a caller can
/// pattern-match on `code` without parsing `message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagerError {
    Unauthorized,
    Forbidden,
    MissingLease,
    TargetMismatch,
    ChildNotAttached,
    FastPathNotReady,
    SessionNotBound,
    ChildOffline,
    QueueOverLimit,
    RateLimited,
    SessionNotFound,
    LeaseNotFound,
    LeaseExpired,
    LeaseRevoked,
    Unavailable,
    BadRequest,
    Internal,
}

impl ManagerError {
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::TargetMismatch | Self::SessionNotBound => StatusCode::CONFLICT,
            Self::ChildNotAttached | Self::FastPathNotReady | Self::ChildOffline => {
                StatusCode::PRECONDITION_FAILED
            }
            Self::QueueOverLimit | Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::MissingLease | Self::SessionNotFound | Self::LeaseNotFound => {
                StatusCode::NOT_FOUND
            }
            Self::LeaseExpired => StatusCode::GONE,
            Self::LeaseRevoked => StatusCode::FORBIDDEN,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::MissingLease => "missing_lease",
            Self::TargetMismatch => "target_mismatch",
            Self::ChildNotAttached => "child_not_attached",
            Self::FastPathNotReady => "fast_path_not_ready",
            Self::SessionNotBound => "session_not_bound",
            Self::ChildOffline => "child_offline",
            Self::QueueOverLimit => "queue_over_limit",
            Self::RateLimited => "rate_limited",
            Self::SessionNotFound => "session_not_found",
            Self::LeaseNotFound => "lease_not_found",
            Self::LeaseExpired => "lease_expired",
            Self::LeaseRevoked => "lease_revoked",
            Self::Unavailable => "unavailable",
            Self::BadRequest => "bad_request",
            Self::Internal => "internal",
        }
    }

    /// Gate-drop reason as counted by `controller_actions_dropped_total{reason}`.
    ///
    /// Returns `None` for errors that are not Command Gate drops.
    pub fn gate_drop_reason(&self) -> Option<&'static str> {
        match self {
            Self::MissingLease
            | Self::TargetMismatch
            | Self::ChildNotAttached
            | Self::FastPathNotReady
            | Self::SessionNotBound
            | Self::ChildOffline => Some(self.as_str()),
            _ => None,
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { error: self.as_str().to_owned(), message: message.into(), detail: None }
    }

    pub fn to_http_response(&self, message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
        (self.http_status(), Json(self.to_error_body(message)))
    }
}

impl fmt::Display for ManagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for ManagerError {}

impl IntoResponse for ManagerError {
    fn into_response(self) -> Response {
        let (status, body) = self.to_http_response(self.to_string());
        (status, body).into_response()
    }
}

/// HTTP error envelope: `{error, message, detail?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}
