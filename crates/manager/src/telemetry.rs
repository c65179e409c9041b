// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Structured logging and the prometheus metrics registry exposed at
//! `/metrics`. Logging mirrors the harness CLI's `init_tracing`: format is
//! selectable between plain and JSON, filter defaults to `info`.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Registry, TextEncoder,
};
use tracing_subscriber::EnvFilter;

use crate::config::ManagerConfig;

/// Initialize the global tracing subscriber. Uses `try_init` so repeated
/// calls (e.g. from integration tests) don't panic.
pub fn init_tracing(config: &ManagerConfig) {
    use tracing_subscriber::fmt;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Named counters and histograms surfaced at `/metrics`, collected in a
/// private [`Registry`] rather than the process-global default so tests can
/// construct independent instances.
pub struct Metrics {
    pub registry: Registry,
    pub actions_dropped: IntCounterVec,
    pub actions_accepted: IntCounterVec,
    pub fast_path_channel_ready_timeouts: IntCounterVec,
    pub ack_latency_seconds: HistogramVec,
    pub fast_path_state_transitions: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let actions_dropped = IntCounterVec::new(
            prometheus::Opts::new(
                "controller_actions_dropped_total",
                "Controller actions dropped by the command gate, by reason",
            ),
            &["reason"],
        )?;
        let actions_accepted = IntCounterVec::new(
            prometheus::Opts::new(
                "controller_actions_accepted_total",
                "Controller actions that passed the command gate and were delivered",
            ),
            &["transport"],
        )?;
        let fast_path_channel_ready_timeouts = IntCounterVec::new(
            prometheus::Opts::new(
                "fast_path_channel_ready_timeout_total",
                "Fast-path sessions that never reached Ready before timing out",
            ),
            &["channel"],
        )?;
        let ack_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "controller_action_ack_latency_seconds",
                "Time from action enqueue to ack receipt",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["transport"],
        )?;
        let fast_path_state_transitions = IntCounterVec::new(
            prometheus::Opts::new(
                "fast_path_state_transitions_total",
                "Fast-path WebRTC state machine transitions, by target state",
            ),
            &["state"],
        )?;

        registry.register(Box::new(actions_dropped.clone()))?;
        registry.register(Box::new(actions_accepted.clone()))?;
        registry.register(Box::new(fast_path_channel_ready_timeouts.clone()))?;
        registry.register(Box::new(ack_latency_seconds.clone()))?;
        registry.register(Box::new(fast_path_state_transitions.clone()))?;

        Ok(Self {
            registry,
            actions_dropped,
            actions_accepted,
            fast_path_channel_ready_timeouts,
            ack_latency_seconds,
            fast_path_state_transitions,
        })
    }

    /// Render in the text exposition format consumed by the `/metrics` route.
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(buf)
    }
}

