// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session registry: durable session rows plus transient runtime state.

pub mod directory;
pub mod registry;
pub mod sweeper;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Harness kind declared at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarnessKind {
    Terminal,
    Gui,
    Custom,
}

/// Preferred delivery path for a session's actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    FastPath,
    HttpFallback,
}

/// Channel labels advertised to a freshly registered or attached session.
pub const CHANNEL_ACTIONS: &str = "mgr-actions";
pub const CHANNEL_ACKS: &str = "mgr-acks";
pub const CHANNEL_STATE: &str = "mgr-state";

/// Endpoint/channel hints returned from `register` and re-pushed on attach
/// transitions and lease changes (§4.5 token rotation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportHints {
    pub signaling_offer_url: String,
    pub channels: [String; 3],
}

impl TransportHints {
    pub fn new(manager_url: &str, session_id: Uuid) -> Self {
        Self {
            signaling_offer_url: format!(
                "{manager_url}/fastpath/sessions/{session_id}/webrtc/offer"
            ),
            channels: [
                CHANNEL_ACTIONS.to_owned(),
                CHANNEL_ACKS.to_owned(),
                CHANNEL_STATE.to_owned(),
            ],
        }
    }
}

/// A durable session row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub private_beach_id: Option<String>,
    pub origin_session_id: String,
    pub harness_kind: HarnessKind,
    pub capabilities: serde_json::Value,
    pub transport_mode: TransportMode,
    pub fast_path_ready: bool,
    pub join_code: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub attached_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Session {
    pub fn is_attached(&self) -> bool {
        self.private_beach_id.is_some() && self.attached_at.is_some()
    }
}

/// Transient runtime row (`session_runtime`): observed, never authoritative.
#[derive(Debug, Clone, Default)]
pub struct SessionRuntime {
    pub last_health_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_snapshot_ref: Option<String>,
    pub offline: bool,
}
