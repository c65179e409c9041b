// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Configuration for the Beach Manager control plane.
#[derive(Debug, Clone, clap::Args)]
pub struct ManagerConfig {
    /// Address to bind the HTTP listener on.
    #[arg(long, default_value = "0.0.0.0:8443", env = "MANAGER_BIND_ADDR")]
    pub bind_addr: String,

    /// Postgres connection string backing the durable tables.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Public base URL of this Manager instance, embedded in transport
    /// hints and the `manager_handshake` payload.
    #[arg(long, default_value = "https://manager.beach.internal", env = "MANAGER_PUBLIC_URL")]
    pub manager_url: String,

    /// Base URL of the external session directory (identity provider),
    /// used for attach-by-code and attach-by-ownership verification.
    #[arg(long, env = "SESSION_DIRECTORY_URL")]
    pub session_directory_url: String,

    /// NATS URL backing the brokered per-session action streams.
    #[arg(long, default_value = "nats://127.0.0.1:4222", env = "BROKER_URL")]
    pub broker_url: String,

    /// JWKS endpoint used to verify inbound user JWTs.
    #[arg(long, env = "BEACH_GATE_JWKS_URL")]
    pub jwks_url: Option<String>,

    /// Expected `iss` claim on user JWTs.
    #[arg(long, env = "BEACH_GATE_ISSUER")]
    pub jwt_issuer: Option<String>,

    /// Expected `aud` claim on user JWTs.
    #[arg(long, env = "BEACH_GATE_AUDIENCE")]
    pub jwt_audience: Option<String>,

    /// Dev bypass for user JWT verification. Never bypasses publish tokens.
    #[arg(long, default_value_t = false, env = "AUTH_BYPASS")]
    pub auth_bypass: bool,

    /// HMAC secret used to sign and verify publish tokens.
    #[arg(long, env = "PUBLISH_TOKEN_SECRET")]
    pub publish_token_secret: String,

    /// When enabled, the Command Gate returns typed drop codes instead of
    /// silently succeeding on ambiguous input.
    #[arg(long, default_value_t = true, env = "CONTROLLER_STRICT_GATING")]
    pub controller_strict_gating: bool,

    /// Maximum idle time before a session is marked offline by the stale
    /// session sweeper.
    #[arg(long, default_value_t = 60_000, env = "STALE_SESSION_MAX_IDLE_MS")]
    pub stale_session_max_idle_ms: u64,

    /// Interval hosts are expected to report health at; used only to size
    /// the sweeper's poll cadence, not to enforce a hard deadline.
    #[arg(long, default_value_t = 15_000, env = "VIEWER_HEALTH_REPORT_INTERVAL_MS")]
    pub viewer_health_report_interval_ms: u64,

    /// Public IP advertised to fast-path peers as an ICE host candidate hint.
    #[arg(long, env = "BEACH_ICE_PUBLIC_IP")]
    pub ice_public_ip: Option<String>,

    /// Lower bound of the UDP port range used for ICE candidates.
    #[arg(long, default_value_t = 50_000, env = "BEACH_ICE_PORT_START")]
    pub ice_port_start: u16,

    /// Upper bound of the UDP port range used for ICE candidates.
    #[arg(long, default_value_t = 50_100, env = "BEACH_ICE_PORT_END")]
    pub ice_port_end: u16,

    /// How long fast-path-delivered broker entries are retained before
    /// being eligible for trim, if not already acked.
    #[arg(long, default_value_t = 600, env = "BROKER_REPLAY_RETENTION_SECS")]
    pub broker_replay_retention_secs: u64,

    /// Sustained rate-limit budget per lease, in actions/second.
    #[arg(long, default_value_t = 30, env = "CONTROLLER_RATE_LIMIT_SUSTAINED")]
    pub rate_limit_sustained: u32,

    /// Burst rate-limit budget per lease.
    #[arg(long, default_value_t = 60, env = "CONTROLLER_RATE_LIMIT_BURST")]
    pub rate_limit_burst: u32,

    /// Pending-actions backpressure ceiling per session.
    #[arg(long, default_value_t = 500, env = "QUEUE_BACKPRESSURE_HIGH")]
    pub queue_backpressure_high: usize,

    /// Pending depth a session must drain to before accepting again.
    #[arg(long, default_value_t = 400, env = "QUEUE_BACKPRESSURE_LOW")]
    pub queue_backpressure_low: usize,

    /// Broker consumer visibility timeout before an entry is reclaimed.
    #[arg(long, default_value_t = 30, env = "QUEUE_VISIBILITY_TIMEOUT_SECS")]
    pub queue_visibility_timeout_secs: u64,

    /// Sliding dedup window size per session, in entries.
    #[arg(long, default_value_t = 2048, env = "ACTION_DEDUPE_WINDOW")]
    pub action_dedupe_window: usize,

    /// Log output format.
    #[arg(long, default_value = "json", env = "MANAGER_LOG_FORMAT")]
    pub log_format: String,
}

impl ManagerConfig {
    pub fn stale_session_max_idle(&self) -> Duration {
        Duration::from_millis(self.stale_session_max_idle_ms)
    }

    pub fn viewer_health_report_interval(&self) -> Duration {
        Duration::from_millis(self.viewer_health_report_interval_ms)
    }

    pub fn broker_replay_retention(&self) -> Duration {
        Duration::from_secs(self.broker_replay_retention_secs)
    }

    pub fn queue_visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_visibility_timeout_secs)
    }
}
