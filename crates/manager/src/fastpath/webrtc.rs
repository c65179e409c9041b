// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebRTC peer construction and signaling. Detached data channels
//! (`SettingEngine::detach_data_channels`) so the three fixed channels can be
//! read/written via plain `read`/`write` on the detached handle instead of
//! through the crate's own message-callback plumbing, matching the retrieved
//! `webrtc-manager` reference's setup for this "accept first channel that
//! opens" pattern (§4.4).

use std::sync::Arc;

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::error::ManagerError;
use crate::fastpath::{forwarder, FastPathSession, FastPathState};
use crate::pipeline::ActionPipeline;
use crate::session::registry::SessionRegistry;
use crate::telemetry::Metrics;

/// ICE server configuration, sourced from `BEACH_ICE_PUBLIC_IP` /
/// `BEACH_ICE_PORT_START/END`. No public STUN default is assumed in
/// production; a Google-STUN fallback is kept only as a logged dev default
/// (§4.4), unlike the reference manager which defaults to it unconditionally.
#[derive(Debug, Clone)]
pub struct IceConfig {
    pub public_ip: Option<String>,
    pub port_start: u16,
    pub port_end: u16,
}

impl IceConfig {
    fn ice_servers(&self) -> Vec<RTCIceServer> {
        if self.public_ip.is_some() {
            Vec::new()
        } else {
            tracing::warn!("BEACH_ICE_PUBLIC_IP unset, falling back to public STUN for dev use only");
            vec![RTCIceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_owned()],
                ..Default::default()
            }]
        }
    }
}

async fn build_api(ice: &IceConfig) -> Result<webrtc::api::API, ManagerError> {
    let mut media_engine = MediaEngine::default();
    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
        tracing::error!(err = %e, "failed to register webrtc interceptors");
        ManagerError::Internal
    })?;

    let mut setting_engine = SettingEngine::default();
    setting_engine.detach_data_channels();
    if let Err(e) = setting_engine.set_ephemeral_udp_port_range(ice.port_start, ice.port_end) {
        tracing::debug!(err = %e, "ephemeral udp port range not set");
    }

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .with_setting_engine(setting_engine)
        .build())
}

/// Handle an inbound SDP offer for `session.session_id`, wiring up the
/// lifecycle callbacks that drive the `Offering -> ... -> Ready` transitions,
/// and return the SDP answer.
pub async fn handle_offer(
    session: Arc<FastPathSession>,
    ice: &IceConfig,
    offer_sdp: &str,
    pipeline: Arc<ActionPipeline>,
    sessions: Arc<SessionRegistry>,
    metrics: Arc<Metrics>,
) -> Result<String, ManagerError> {
    let api = build_api(ice).await?;

    let config = RTCConfiguration { ice_servers: ice.ice_servers(), ..Default::default() };

    let peer_connection = Arc::new(api.new_peer_connection(config).await.map_err(|e| {
        tracing::error!(err = %e, "failed to create peer connection");
        ManagerError::Internal
    })?);

    wire_callbacks(&peer_connection, session.clone(), pipeline, sessions, metrics);
    session.set_peer_connection(peer_connection.clone()).await;

    let offer = RTCSessionDescription::offer(offer_sdp.to_owned()).map_err(|e| {
        tracing::warn!(err = %e, "malformed sdp offer");
        ManagerError::BadRequest
    })?;

    peer_connection.set_remote_description(offer).await.map_err(|e| {
        tracing::warn!(err = %e, "set_remote_description failed");
        ManagerError::BadRequest
    })?;

    let answer = peer_connection.create_answer(None).await.map_err(|e| {
        tracing::error!(err = %e, "create_answer failed");
        ManagerError::Internal
    })?;

    peer_connection.set_local_description(answer.clone()).await.map_err(|e| {
        tracing::error!(err = %e, "set_local_description failed");
        ManagerError::Internal
    })?;

    Ok(answer.sdp)
}

pub async fn add_ice_candidate(
    session: &FastPathSession,
    candidate: &str,
    sdp_mid: Option<&str>,
    sdp_mline_index: Option<u32>,
) -> Result<(), ManagerError> {
    let pc = session.peer_connection().await.ok_or(ManagerError::FastPathNotReady)?;

    let init = RTCIceCandidateInit {
        candidate: candidate.to_owned(),
        sdp_mid: sdp_mid.map(|s| s.to_owned()),
        sdp_mline_index: sdp_mline_index.map(|i| i as u16),
        ..Default::default()
    };

    pc.add_ice_candidate(init).await.map_err(|e| {
        tracing::warn!(err = %e, "add_ice_candidate failed");
        ManagerError::BadRequest
    })?;

    session.set_state(FastPathState::Connecting).await;
    Ok(())
}

fn wire_callbacks(
    pc: &Arc<RTCPeerConnection>,
    session: Arc<FastPathSession>,
    pipeline: Arc<ActionPipeline>,
    sessions: Arc<SessionRegistry>,
    metrics: Arc<Metrics>,
) {
    let s = session.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let session = s.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                tracing::debug!(session_id = %session.session_id, "ice gathering complete");
                return;
            };
            match candidate.to_json() {
                Ok(init) => {
                    session
                        .push_outbound_candidate(crate::fastpath::IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                        })
                        .await;
                }
                Err(e) => tracing::warn!(err = %e, "failed to serialize local ice candidate"),
            }
        })
    }));

    let s = session.clone();
    let sessions_for_state = sessions.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let session = s.clone();
        let sessions = sessions_for_state.clone();
        Box::pin(async move {
            match state {
                RTCPeerConnectionState::Connected => {
                    session.set_state(FastPathState::ChannelsOpening).await;
                }
                RTCPeerConnectionState::Disconnected
                | RTCPeerConnectionState::Failed
                | RTCPeerConnectionState::Closed => {
                    session.set_state(FastPathState::Closed).await;
                    if let Err(e) = sessions.set_fast_path_ready(session.session_id, false).await {
                        tracing::warn!(err = ?e, session_id = %session.session_id, "failed to clear fast_path_ready on teardown");
                    }
                    if let Err(e) = sessions
                        .set_transport_mode(session.session_id, crate::session::TransportMode::HttpFallback)
                        .await
                    {
                        tracing::warn!(err = ?e, session_id = %session.session_id, "failed to revert transport_mode on teardown");
                    }
                }
                _ => {}
            }
        })
    }));

    let s = session.clone();
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let session = s.clone();
        let pipeline = pipeline.clone();
        let sessions = sessions.clone();
        let metrics = metrics.clone();
        Box::pin(async move { on_data_channel_open(session, dc, pipeline, sessions, metrics).await })
    }));
}

/// Called when one of the three fixed channels opens. Detaches it and hands
/// the raw read/write handle to the forwarder, which drives the `__ready__`
/// handshake and subsequent per-channel message routing (§4.4).
async fn on_data_channel_open(
    session: Arc<FastPathSession>,
    dc: Arc<RTCDataChannel>,
    pipeline: Arc<ActionPipeline>,
    sessions: Arc<SessionRegistry>,
    metrics: Arc<Metrics>,
) {
    let label: &'static str = match dc.label() {
        l if l == crate::fastpath::CHANNEL_ACTIONS => crate::fastpath::CHANNEL_ACTIONS,
        l if l == crate::fastpath::CHANNEL_ACKS => crate::fastpath::CHANNEL_ACKS,
        l if l == crate::fastpath::CHANNEL_STATE => crate::fastpath::CHANNEL_STATE,
        other => {
            tracing::warn!(label = %other, "unexpected data channel label, ignoring");
            return;
        }
    };

    let dc_open = dc.clone();
    dc.on_open(Box::new(move || {
        let dc = dc_open.clone();
        let session = session.clone();
        let pipeline = pipeline.clone();
        let sessions = sessions.clone();
        let metrics = metrics.clone();
        Box::pin(async move {
            let raw = match dc.detach().await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(err = %e, label, "failed to detach data channel");
                    return;
                }
            };
            session.set_channel(label, raw.clone()).await;
            forwarder::spawn_channel_reader(session, label, raw, pipeline, sessions, metrics);
        })
    }));
}
