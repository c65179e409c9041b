// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The manager-side WebRTC peer for a session: lifecycle state machine,
//! the three fixed data channels, and the process-wide registry the Command
//! Gate reads to decide `fast_path_delivered` (§4.4).

pub mod forwarder;
pub mod webrtc;
pub mod wire;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;
use webrtc::data::data_channel::DataChannel;
use webrtc::peer_connection::RTCPeerConnection;

pub const CHANNEL_ACTIONS: &str = crate::session::CHANNEL_ACTIONS;
pub const CHANNEL_ACKS: &str = crate::session::CHANNEL_ACKS;
pub const CHANNEL_STATE: &str = crate::session::CHANNEL_STATE;

const ALL_CHANNELS: [&str; 3] = [CHANNEL_ACTIONS, CHANNEL_ACKS, CHANNEL_STATE];

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FastPathState {
    Idle,
    Offering,
    Connecting,
    ChannelsOpening,
    Ready,
    Closed,
}

/// One manager-side WebRTC peer. `fast_path_id` is a fresh id minted on
/// every `Idle -> Offering` transition; the forwarder never waits on a
/// specific id matching (§4.4 first-channel-wins) — it binds to whichever
/// `mgr-actions` channel first reaches Ready.
pub struct FastPathSession {
    pub fast_path_id: Uuid,
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    state: RwLock<FastPathState>,
    peer_connection: RwLock<Option<Arc<RTCPeerConnection>>>,
    channels: RwLock<HashMap<&'static str, Arc<DataChannel>>>,
    ready_confirmed: RwLock<HashSet<&'static str>>,
    /// Locally gathered ICE candidates awaiting pickup by the host's
    /// trickle-ICE poll (`GET .../webrtc/ice`), drained on each poll.
    outbound_candidates: RwLock<Vec<IceCandidate>>,
}

/// One manager-gathered ICE candidate, serialized for the host to consume.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

impl FastPathSession {
    fn new(session_id: Uuid) -> Self {
        Self {
            fast_path_id: Uuid::new_v4(),
            session_id,
            created_at: Utc::now(),
            state: RwLock::new(FastPathState::Idle),
            peer_connection: RwLock::new(None),
            channels: RwLock::new(HashMap::new()),
            ready_confirmed: RwLock::new(HashSet::new()),
            outbound_candidates: RwLock::new(Vec::new()),
        }
    }

    pub async fn push_outbound_candidate(&self, candidate: IceCandidate) {
        self.outbound_candidates.write().await.push(candidate);
    }

    /// Drain every candidate gathered since the last poll.
    pub async fn drain_outbound_candidates(&self) -> Vec<IceCandidate> {
        std::mem::take(&mut *self.outbound_candidates.write().await)
    }

    pub async fn state(&self) -> FastPathState {
        *self.state.read().await
    }

    pub async fn set_state(&self, next: FastPathState) {
        *self.state.write().await = next;
    }

    /// `true` once all three channels have been observed open and have each
    /// exchanged the `__ready__` sentinel (§4.4 Channels-Opening -> Ready).
    pub async fn all_channels_ready(&self) -> bool {
        let confirmed = self.ready_confirmed.read().await;
        ALL_CHANNELS.iter().all(|c| confirmed.contains(c))
    }

    pub async fn mark_channel_ready(&self, label: &'static str) {
        self.ready_confirmed.write().await.insert(label);
    }

    /// `true` once this one channel has exchanged the `__ready__` sentinel,
    /// independent of the other two. Used by the per-channel sentinel retry
    /// loop and ready-handshake timeout to know when to stop.
    pub async fn channel_ready(&self, label: &str) -> bool {
        self.ready_confirmed.read().await.contains(label)
    }

    /// Stores the detached read/write handle for `label`, obtained via
    /// `RTCDataChannel::detach()` once the channel's `on_open` fires.
    pub async fn set_channel(&self, label: &'static str, channel: Arc<DataChannel>) {
        self.channels.write().await.insert(label, channel);
    }

    pub async fn channel(&self, label: &str) -> Option<Arc<DataChannel>> {
        self.channels.read().await.get(label).cloned()
    }

    pub async fn set_peer_connection(&self, pc: Arc<RTCPeerConnection>) {
        *self.peer_connection.write().await = Some(pc);
    }

    pub async fn peer_connection(&self) -> Option<Arc<RTCPeerConnection>> {
        self.peer_connection.read().await.clone()
    }

    /// Delivery readiness as read by the Command Gate: the `mgr-actions`
    /// channel must exist and the session must have reached Ready.
    pub async fn is_delivery_ready(&self) -> bool {
        self.state().await == FastPathState::Ready && self.channel(CHANNEL_ACTIONS).await.is_some()
    }
}

/// Process-wide `session_id -> FastPathSession` map. Sharding is left to the
/// single `RwLock<HashMap<..>>`: fast-path churn is orders of magnitude
/// rarer than action throughput, so a coarse lock held only for map lookups
/// (never across a send) is sufficient (§5 shared resource policy).
pub struct FastPathRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<FastPathSession>>>,
}

impl FastPathRegistry {
    pub fn new() -> Self {
        Self { sessions: RwLock::new(HashMap::new()) }
    }

    /// Start a fresh peer for `session_id`, replacing any prior entry. The
    /// caller is responsible for having drained or timed out the prior
    /// session's ack loops first (§4.4).
    pub async fn begin_offer(&self, session_id: Uuid) -> Arc<FastPathSession> {
        let session = Arc::new(FastPathSession::new(session_id));
        session.set_state(FastPathState::Offering).await;
        self.sessions.write().await.insert(session_id, session.clone());
        session
    }

    pub async fn get(&self, session_id: Uuid) -> Option<Arc<FastPathSession>> {
        self.sessions.read().await.get(&session_id).cloned()
    }

    pub async fn is_delivery_ready(&self, session_id: Uuid) -> bool {
        match self.get(session_id).await {
            Some(session) => session.is_delivery_ready().await,
            None => false,
        }
    }

    pub async fn close(&self, session_id: Uuid) {
        if let Some(session) = self.sessions.read().await.get(&session_id).cloned() {
            session.set_state(FastPathState::Closed).await;
        }
    }

    pub async fn remove(&self, session_id: Uuid) {
        self.sessions.write().await.remove(&session_id);
    }
}

impl Default for FastPathRegistry {
    fn default() -> Self {
        Self::new()
    }
}
