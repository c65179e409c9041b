// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::lease::manager::LeaseManager;

/// Marks expired leases for cleanup bookkeeping, honoring a grace window
/// before `expired_at` is set. Must never revoke — expiry is lazily
/// evaluated at validation time regardless of what this sweeper has seen.
pub fn spawn_lease_sweeper(
    leases: Arc<LeaseManager>,
    grace: chrono::Duration,
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

            match leases.sweep_expired(grace).await {
                Ok(0) => {}
                Ok(n) => tracing::debug!(count = n, "swept expired leases"),
                Err(e) => tracing::warn!(err = %e, "lease sweep failed"),
            }
        }
    });
}
