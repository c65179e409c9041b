// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::handshake::HandshakeCoordinator;

/// Keeps every attached session's idle publish token fresh without requiring
/// the host to re-attach. The host still only ever reads via
/// `GET /sessions/:id/handshake`; this sweeper just keeps that mailbox from
/// going stale.
pub fn spawn_handshake_rotation_sweeper(
    coordinator: Arc<HandshakeCoordinator>,
    poll_interval: Duration,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(poll_interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            let rotated = coordinator.rotate_expiring().await;
            if rotated > 0 {
                tracing::debug!(count = rotated, "rotated handshake publish tokens");
            }
        }
    });
}
