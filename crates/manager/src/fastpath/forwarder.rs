// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-channel read loops over a detached [`DataChannel`]. Each of the three
//! fixed channels (`mgr-actions`, `mgr-acks`, `mgr-state`) gets its own
//! reader, spawned once `on_open` fires (§4.4). The first message on every
//! channel is the plaintext `__ready__` sentinel; once all three have been
//! observed, the session transitions to `Ready` and the Command Gate may
//! treat it as fast-path delivery ready.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;
use tokio::time::interval;
use uuid::Uuid;
use webrtc::data::data_channel::DataChannel;

use crate::fastpath::{FastPathSession, FastPathState, CHANNEL_ACKS, CHANNEL_STATE};
use crate::pipeline::{AckRecord, ActionPipeline};
use crate::session::registry::SessionRegistry;
use crate::session::TransportMode;
use crate::telemetry::Metrics;

const READY_SENTINEL: &[u8] = b"__ready__";
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// §4.4: "The Manager emits `__ready__` from its side immediately on each
/// channel's open event and retries up to 8 times at 2 s intervals."
const READY_RETRY_INTERVAL: Duration = Duration::from_secs(2);
const READY_RETRY_MAX_ATTEMPTS: u32 = 8;

/// §5: "The handshake waits for `__ready__` with 10 s per channel; a miss
/// closes the peer and increments `fast_path_channel_ready_timeout_total`."
const READY_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct StateReport {
    snapshot_ref: Option<String>,
}

/// Sends this side's `__ready__` sentinel and spawns the channel's read
/// loop. The loop itself observes the peer's own sentinel (the first
/// message received) before treating anything else as application data.
pub fn spawn_channel_reader(
    session: Arc<FastPathSession>,
    label: &'static str,
    raw: Arc<DataChannel>,
    pipeline: Arc<ActionPipeline>,
    sessions: Arc<SessionRegistry>,
    metrics: Arc<Metrics>,
) {
    let session_id = session.session_id;

    spawn_ready_sentinel_loop(session.clone(), label, raw.clone());
    spawn_ready_handshake_timeout(session.clone(), label, metrics);

    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut handshake_done = false;

        loop {
            let n = match raw.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(err = %e, label, session_id = %session_id, "channel read loop ended");
                    break;
                }
            };
            if n == 0 {
                break;
            }
            let data = &buf[..n];

            if !handshake_done {
                if data == READY_SENTINEL {
                    handshake_done = true;
                    session.mark_channel_ready(label).await;
                    if session.all_channels_ready().await {
                        session.set_state(FastPathState::Ready).await;
                        if let Err(e) = sessions.set_fast_path_ready(session_id, true).await {
                            tracing::warn!(err = ?e, session_id = %session_id, "failed to persist fast_path_ready");
                        }
                        if let Err(e) = sessions.set_transport_mode(session_id, TransportMode::FastPath).await {
                            tracing::warn!(err = ?e, session_id = %session_id, "failed to persist transport_mode");
                        }
                        tracing::info!(session_id = %session_id, "fast path ready");
                    }
                    continue;
                }
                tracing::warn!(label, session_id = %session_id, "first channel message was not the ready sentinel");
                handshake_done = true;
            }

            dispatch(session_id, label, data, &pipeline, &sessions).await;
        }
    });
}

/// Sends the `__ready__` sentinel immediately, then re-sends at
/// [`READY_RETRY_INTERVAL`] up to [`READY_RETRY_MAX_ATTEMPTS`] total attempts,
/// covering the case where the peer never received an earlier send (a
/// dropped first SCTP message is a known edge case). Stops as soon as this
/// channel has itself observed the peer's sentinel.
fn spawn_ready_sentinel_loop(session: Arc<FastPathSession>, label: &'static str, raw: Arc<DataChannel>) {
    tokio::spawn(async move {
        let mut ticker = interval(READY_RETRY_INTERVAL);
        for attempt in 0..READY_RETRY_MAX_ATTEMPTS {
            ticker.tick().await; // first tick fires immediately
            if session.channel_ready(label).await {
                return;
            }
            if let Err(e) = raw.write(&Bytes::from_static(READY_SENTINEL)).await {
                tracing::warn!(
                    err = %e, label, attempt, session_id = %session.session_id,
                    "ready sentinel send failed"
                );
            }
        }
    });
}

/// Closes the peer and increments `fast_path_channel_ready_timeout_total` if
/// this channel hasn't completed the `__ready__` handshake within
/// [`READY_HANDSHAKE_TIMEOUT`] (spec §5, §8 testable property 8).
fn spawn_ready_handshake_timeout(session: Arc<FastPathSession>, label: &'static str, metrics: Arc<Metrics>) {
    tokio::spawn(async move {
        tokio::time::sleep(READY_HANDSHAKE_TIMEOUT).await;
        if session.channel_ready(label).await {
            return;
        }
        let session_id = session.session_id;
        tracing::warn!(label, session_id = %session_id, "fast-path channel ready handshake timed out");
        metrics.fast_path_channel_ready_timeouts.with_label_values(&[label]).inc();
        session.set_state(FastPathState::Closed).await;
        if let Some(pc) = session.peer_connection().await {
            if let Err(e) = pc.close().await {
                tracing::warn!(err = %e, session_id = %session_id, "failed to close peer after ready handshake timeout");
            }
        }
    });
}

async fn dispatch(
    session_id: Uuid,
    label: &'static str,
    data: &[u8],
    pipeline: &Arc<ActionPipeline>,
    sessions: &Arc<SessionRegistry>,
) {
    match label {
        CHANNEL_ACKS => match serde_json::from_slice::<AckRecord>(data) {
            Ok(ack) => pipeline.handle_ack(session_id, ack).await,
            Err(e) => tracing::warn!(err = %e, session_id = %session_id, "malformed ack record on mgr-acks"),
        },
        CHANNEL_STATE => match serde_json::from_slice::<StateReport>(data) {
            Ok(report) => {
                sessions.update_runtime(session_id, Some(chrono::Utc::now()), report.snapshot_ref).await;
            }
            Err(e) => tracing::warn!(err = %e, session_id = %session_id, "malformed state report on mgr-state"),
        },
        other => {
            tracing::debug!(label = %other, session_id = %session_id, "unexpected inbound data, ignoring");
        }
    }
}
