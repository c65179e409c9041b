// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background sweeper marking sessions offline once their health heartbeat
//! goes stale. Per spec §4.1 this never revokes controller leases — lease
//! expiry is the Lease Manager's concern alone.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::session::registry::SessionRegistry;

pub fn spawn_stale_session_sweeper(
    registry: Arc<SessionRegistry>,
    max_idle: Duration,
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

            let ids = registry.runtime_ids().await;
            for session_id in ids {
                let runtime = registry.runtime_snapshot(session_id).await;
                let Some(last_health) = runtime.last_health_at else { continue };
                let idle = chrono::Utc::now().signed_duration_since(last_health);
                let stale = idle.to_std().map(|d| d > max_idle).unwrap_or(true);

                if stale && !runtime.offline {
                    tracing::warn!(session_id = %session_id, "marking session offline (stale heartbeat)");
                    registry.mark_offline(session_id, true).await;
                } else if !stale && runtime.offline {
                    registry.mark_offline(session_id, false).await;
                }
            }
        }
    });
}

/// Periodically upserts the in-memory runtime cache into the durable
/// `session_runtime` table.
pub fn spawn_runtime_flusher(
    registry: Arc<SessionRegistry>,
    flush_interval: Duration,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(flush_interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            match registry.flush_runtime_to_db().await {
                Ok(n) => tracing::trace!(count = n, "flushed session_runtime"),
                Err(e) => tracing::warn!(err = %e, "session_runtime flush failed"),
            }
        }
    });
}
