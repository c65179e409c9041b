// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Action Pipeline: `queue_actions` runs a batch through the [`gate`]
//! predicate table, dedups against the per-session window, checks the
//! per-lease rate limiter and per-session backpressure, then routes each
//! surviving action down both the fast-path data channel (best-effort) and
//! the brokered stream (mandatory dual-write) per spec §4.3.

pub mod dedupe;
pub mod gate;
pub mod ratelimit;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use uuid::Uuid;
use webrtc::data::data_channel::DataChannel;

use crate::audit::{AuditService, ControllerEventType};
use crate::auth::Principal;
use crate::broker::BrokerStream;
use crate::config::ManagerConfig;
use crate::error::ManagerError;
use crate::fastpath::wire::{encode_frame, split_into_chunks, FrameKind};
use crate::fastpath::{FastPathRegistry, CHANNEL_ACTIONS};
use crate::lease::manager::LeaseManager;
use crate::session::registry::SessionRegistry;
use crate::telemetry::Metrics;

use dedupe::DedupeWindow;
use gate::CommandGate;
use ratelimit::TokenBucket;

/// §5: "Fast-path channel opens have a 15 s timeout before falling back to
/// broker-only mode for that batch (the session remains eligible for future
/// fast-path delivery)."
const FAST_PATH_SEND_TIMEOUT: Duration = Duration::from_secs(15);

/// §5: "`queue_actions` itself is bounded to 5 s end-to-end."
const QUEUE_ACTIONS_DEADLINE: Duration = Duration::from_secs(5);

/// §4.3: "the gate emits a warn log once per rate-limit window per lease."
/// One second matches the bucket's own sustained-rate granularity.
const RATE_LIMIT_WARN_WINDOW: Duration = Duration::from_secs(1);

/// One action submitted by a controller (spec §3 "Action"). `kind` is
/// carried on the wire as `type` to match the client-facing contract; the
/// Manager never parses `payload` (spec §9 "Dynamic payloads").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionCommand {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// An ack reported back by a host, over either transport (spec §3 "Ack
/// record").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckRecord {
    pub id: String,
    pub status: AckStatus,
    pub applied_at: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Applied,
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectedAction {
    pub id: String,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueOutcome {
    pub accepted_ids: Vec<String>,
    pub rejected: Vec<RejectedAction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeliveryTransport {
    FastPath,
    HttpFallback,
}

impl DeliveryTransport {
    fn as_str(self) -> &'static str {
        match self {
            Self::FastPath => "fast_path",
            Self::HttpFallback => "http_fallback",
        }
    }
}

struct PendingAck {
    sequence: u64,
    enqueued_at: Instant,
    transport: DeliveryTransport,
}

/// Owns every piece of mutable, in-process pipeline state: per-session dedup
/// windows, per-lease rate limiters, the correlation table from action id to
/// broker sequence, backpressure hysteresis, and http-poll recency.
pub struct ActionPipeline {
    leases: Arc<LeaseManager>,
    sessions: Arc<SessionRegistry>,
    fastpath: Arc<FastPathRegistry>,
    broker: Arc<BrokerStream>,
    audit: Arc<AuditService>,
    metrics: Arc<Metrics>,

    dedupe_capacity: usize,
    rate_sustained: u32,
    rate_burst: u32,
    backpressure_high: usize,
    backpressure_low: usize,
    ack_timeout: Duration,
    poll_active_window: Duration,
    strict_gating: bool,

    dedupe: RwLock<HashMap<Uuid, DedupeWindow>>,
    rate_limiters: RwLock<HashMap<Uuid, TokenBucket>>,
    pending: RwLock<HashMap<Uuid, HashMap<String, PendingAck>>>,
    backpressure_engaged: RwLock<std::collections::HashSet<Uuid>>,
    last_poll: RwLock<HashMap<Uuid, Instant>>,
    rate_limit_warned: RwLock<HashMap<Uuid, Instant>>,
}

impl ActionPipeline {
    pub fn new(
        leases: Arc<LeaseManager>,
        sessions: Arc<SessionRegistry>,
        fastpath: Arc<FastPathRegistry>,
        broker: Arc<BrokerStream>,
        audit: Arc<AuditService>,
        metrics: Arc<Metrics>,
        config: &ManagerConfig,
    ) -> Self {
        Self {
            leases,
            sessions,
            fastpath,
            broker,
            audit,
            metrics,
            dedupe_capacity: config.action_dedupe_window,
            rate_sustained: config.rate_limit_sustained,
            rate_burst: config.rate_limit_burst,
            backpressure_high: config.queue_backpressure_high,
            backpressure_low: config.queue_backpressure_low,
            ack_timeout: config.queue_visibility_timeout(),
            poll_active_window: Duration::from_millis(
                (config.viewer_health_report_interval_ms * 2).max(2000),
            ),
            strict_gating: config.controller_strict_gating,
            dedupe: RwLock::new(HashMap::new()),
            rate_limiters: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
            backpressure_engaged: RwLock::new(std::collections::HashSet::new()),
            last_poll: RwLock::new(HashMap::new()),
            rate_limit_warned: RwLock::new(HashMap::new()),
        }
    }

    /// Marks that a host polled `/actions/poll` for `session_id` just now,
    /// so the Command Gate's fast-path-readiness check can treat an active
    /// HTTP poller as a substitute for an open data channel.
    pub async fn mark_polled(&self, session_id: Uuid) {
        self.last_poll.write().await.insert(session_id, Instant::now());
    }

    async fn http_poller_active(&self, session_id: Uuid) -> bool {
        match self.last_poll.read().await.get(&session_id) {
            Some(at) => at.elapsed() < self.poll_active_window,
            None => false,
        }
    }

    async fn pending_depth(&self, session_id: Uuid) -> usize {
        self.pending.read().await.get(&session_id).map(|m| m.len()).unwrap_or(0)
    }

    /// Backpressure hysteresis: once engaged at `>= high`, stays engaged
    /// until depth drops `< low` (spec §4.3).
    async fn backpressure_blocked(&self, session_id: Uuid) -> bool {
        let depth = self.pending_depth(session_id).await;
        let mut engaged = self.backpressure_engaged.write().await;
        if engaged.contains(&session_id) {
            if depth < self.backpressure_low {
                engaged.remove(&session_id);
                false
            } else {
                true
            }
        } else if depth >= self.backpressure_high {
            engaged.insert(session_id);
            true
        } else {
            false
        }
    }

    /// Logs and accounts for one gate drop or a `queue_over_limit`/
    /// `rate_limited` rejection, carrying the field set spec §4.3 mandates:
    /// `{controller_session_id, child_session_id, lease_id, target_session_id,
    /// transport}`. `controller_session_id` is the lease's own bound session
    /// (Scenario C's `S3`, distinct from the `target_session_id` the batch
    /// addressed, `S4`) when a lease resolved far enough to know it; `None`
    /// when the token itself never resolved (`missing_lease`).
    async fn record_drop(
        &self,
        controller_session_id: Option<Uuid>,
        target_session_id: Uuid,
        lease_id: Option<Uuid>,
        reason: &'static str,
    ) {
        tracing::info!(
            controller_session_id = ?controller_session_id,
            child_session_id = %target_session_id,
            lease_id = ?lease_id,
            target_session_id = %target_session_id,
            transport = "none",
            reason,
            "command gate drop"
        );
        self.metrics.actions_dropped.with_label_values(&[reason]).inc();
        let _ = self
            .audit
            .record(
                target_session_id,
                ControllerEventType::GateDrop,
                None,
                None,
                lease_id,
                json!({"reason": reason}),
            )
            .await;
    }

    /// Warns once per [`RATE_LIMIT_WARN_WINDOW`] per lease on a
    /// `rate_limited` rejection (spec §4.3), rather than once per rejected
    /// batch — a lease hammering the bucket would otherwise flood the log.
    async fn warn_rate_limited_once(&self, lease_id: Uuid, session_id: Uuid) {
        let now = Instant::now();
        let mut warned = self.rate_limit_warned.write().await;
        let should_warn = match warned.get(&lease_id) {
            Some(last) => now.duration_since(*last) >= RATE_LIMIT_WARN_WINDOW,
            None => true,
        };
        if should_warn {
            warned.insert(lease_id, now);
            drop(warned);
            tracing::warn!(lease_id = %lease_id, session_id = %session_id, "lease exceeded rate limit");
        }
    }

    /// Runs [`queue_actions_inner`] under the 5 s end-to-end deadline spec §5
    /// mandates, surfacing a timeout as an infrastructure error rather than
    /// hanging the caller.
    pub async fn queue_actions(
        &self,
        target_session_id: Uuid,
        lease_token: Uuid,
        private_beach_id: &str,
        actions: Vec<ActionCommand>,
        principal: &Principal,
    ) -> Result<QueueOutcome, ManagerError> {
        match tokio::time::timeout(
            QUEUE_ACTIONS_DEADLINE,
            self.queue_actions_inner(target_session_id, lease_token, private_beach_id, actions, principal),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    session_id = %target_session_id,
                    "queue_actions exceeded its 5s end-to-end deadline"
                );
                Err(ManagerError::Unavailable)
            }
        }
    }

    /// Runs a batch through the Command Gate, then dedup, rate limit, and
    /// backpressure; a gate drop fails the whole batch uniformly. Surviving
    /// actions are routed individually and may be partially rejected (rate
    /// limit, backpressure) while the rest are accepted.
    async fn queue_actions_inner(
        &self,
        target_session_id: Uuid,
        lease_token: Uuid,
        private_beach_id: &str,
        actions: Vec<ActionCommand>,
        principal: &Principal,
    ) -> Result<QueueOutcome, ManagerError> {
        let http_poller_active = self.http_poller_active(target_session_id).await;
        let gate = CommandGate::new(&self.leases, &self.sessions, &self.fastpath);

        let outcome = match gate
            .evaluate(lease_token, target_session_id, principal, http_poller_active, self.strict_gating)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                if let Some(reason) = err.gate_drop_reason() {
                    self.record_drop(None, target_session_id, None, reason).await;
                }
                return Err(err);
            }
        };
        let lease = outcome.lease;

        if self.backpressure_blocked(target_session_id).await {
            self.record_drop(Some(lease.session_id), target_session_id, Some(lease.id), "queue_over_limit").await;
            return Err(ManagerError::QueueOverLimit);
        }

        {
            let mut limiters = self.rate_limiters.write().await;
            let bucket = limiters
                .entry(lease.id)
                .or_insert_with(|| TokenBucket::new(self.rate_sustained, self.rate_burst));
            if !bucket.try_take(actions.len() as u32) {
                drop(limiters);
                self.warn_rate_limited_once(lease.id, target_session_id).await;
                self.record_drop(Some(lease.session_id), target_session_id, Some(lease.id), "rate_limited").await;
                return Err(ManagerError::RateLimited);
            }
        }

        let mut accepted_ids = Vec::with_capacity(actions.len());
        let mut rejected = Vec::new();

        for action in actions {
            let is_duplicate = {
                let mut windows = self.dedupe.write().await;
                let window =
                    windows.entry(target_session_id).or_insert_with(|| DedupeWindow::new(self.dedupe_capacity));
                window.check_and_insert(&action.id)
            };

            if is_duplicate {
                tracing::debug!(
                    session_id = %target_session_id, action_id = %action.id,
                    "duplicate action id within dedup window, not re-delivered"
                );
                accepted_ids.push(action.id);
                continue;
            }

            match self.route(target_session_id, private_beach_id, &action).await {
                Ok(transport) => {
                    tracing::info!(
                        controller_session_id = %lease.session_id,
                        child_session_id = %target_session_id,
                        lease_id = %lease.id,
                        target_session_id = %target_session_id,
                        transport = transport.as_str(),
                        action_id = %action.id,
                        "command gate accept"
                    );
                    self.metrics.actions_accepted.with_label_values(&[transport.as_str()]).inc();
                    accepted_ids.push(action.id);
                }
                Err(err) => {
                    rejected.push(RejectedAction {
                        id: action.id,
                        code: err.as_str(),
                        message: err.to_string(),
                    });
                }
            }
        }

        Ok(QueueOutcome { accepted_ids, rejected })
    }

    /// Routes one action: always dual-writes to the broker, and additionally
    /// attempts fast-path delivery when the channel is open (spec §4.3
    /// routing: "fast-path success still appends to the broker stream").
    /// The fast-path send attempt is bounded to [`FAST_PATH_SEND_TIMEOUT`]; a
    /// channel that accepts the write but never completes it within that
    /// window falls back to broker-only delivery for this one batch, per
    /// spec §5, without touching the session's fast-path eligibility.
    async fn route(
        &self,
        session_id: Uuid,
        private_beach_id: &str,
        action: &ActionCommand,
    ) -> Result<DeliveryTransport, ManagerError> {
        let payload = serde_json::to_vec(action).map_err(|_| ManagerError::BadRequest)?;

        let sequence = self
            .broker
            .append(private_beach_id, session_id, &payload)
            .await
            .map_err(|e| {
                tracing::error!(err = %e, session_id = %session_id, "broker append failed");
                ManagerError::Unavailable
            })?;

        let mut transport = DeliveryTransport::HttpFallback;
        if let Some(fp) = self.fastpath.get(session_id).await {
            if fp.is_delivery_ready().await {
                if let Some(dc) = fp.channel(CHANNEL_ACTIONS).await {
                    match tokio::time::timeout(
                        FAST_PATH_SEND_TIMEOUT,
                        send_action_frames(&dc, sequence, &payload),
                    )
                    .await
                    {
                        Ok(true) => transport = DeliveryTransport::FastPath,
                        Ok(false) => {}
                        Err(_) => {
                            tracing::warn!(
                                session_id = %session_id,
                                "fast-path send exceeded 15s, falling back to broker-only for this batch"
                            );
                        }
                    }
                }
            }
        }

        let mut pending = self.pending.write().await;
        pending.entry(session_id).or_default().insert(
            action.id.clone(),
            PendingAck { sequence, enqueued_at: Instant::now(), transport },
        );

        Ok(transport)
    }

    /// Applies an ack reported by a host, over either transport. Deletes the
    /// broker entry by sequence and records ack latency.
    pub async fn handle_ack(&self, session_id: Uuid, ack: AckRecord) {
        let pending_entry = {
            let mut pending = self.pending.write().await;
            pending.get_mut(&session_id).and_then(|m| m.remove(&ack.id))
        };

        let Some(entry) = pending_entry else {
            tracing::debug!(session_id = %session_id, action_id = %ack.id, "ack for unknown or already-acked action");
            return;
        };

        if let Err(e) = self.broker.delete(session_id, entry.sequence).await {
            tracing::warn!(err = %e, session_id = %session_id, "broker delete on ack failed");
        }

        self.metrics
            .ack_latency_seconds
            .with_label_values(&[entry.transport.as_str()])
            .observe(entry.enqueued_at.elapsed().as_secs_f64());
    }

    /// Sweeps acks that never arrived within `queue_visibility_timeout`,
    /// recording an audit event per stale entry. The broker entry itself is
    /// left alone — JetStream's own `ack_wait` redelivery is the reclaim
    /// path; this sweep only keeps the in-memory correlation table and
    /// audit trail honest.
    pub async fn sweep_stale_acks(&self) {
        let now = Instant::now();
        let mut stale: Vec<(Uuid, String)> = Vec::new();

        {
            let pending = self.pending.read().await;
            for (session_id, actions) in pending.iter() {
                for (action_id, entry) in actions.iter() {
                    if now.duration_since(entry.enqueued_at) > self.ack_timeout {
                        stale.push((*session_id, action_id.clone()));
                    }
                }
            }
        }

        for (session_id, action_id) in stale {
            {
                let mut pending = self.pending.write().await;
                if let Some(map) = pending.get_mut(&session_id) {
                    map.remove(&action_id);
                }
            }
            let _ = self
                .audit
                .record(
                    session_id,
                    ControllerEventType::AckTimeout,
                    None,
                    None,
                    None,
                    json!({"action_id": action_id}),
                )
                .await;
        }
    }

    /// Current pending depth, for `/sessions/:id/actions/pending`.
    pub async fn pending_count(&self, session_id: Uuid) -> usize {
        self.pending_depth(session_id).await
    }
}

/// Writes one action's frame(s) to `mgr-actions`, chunking above the wire
/// threshold. Returns `false` on the first failed write so the caller falls
/// back to broker-only delivery for this action.
async fn send_action_frames(dc: &Arc<DataChannel>, sequence: u64, payload: &[u8]) -> bool {
    let chunks = split_into_chunks(payload);
    if chunks.len() == 1 {
        let frame = encode_frame(FrameKind::Action, sequence, chunks[0]);
        dc.write(&bytes::Bytes::from(frame)).await.is_ok()
    } else {
        for chunk in chunks {
            let frame = encode_frame(FrameKind::Chunk, sequence, chunk);
            if dc.write(&bytes::Bytes::from(frame)).await.is_err() {
                return false;
            }
        }
        true
    }
}

/// Periodically sweeps ack timeouts; spawned alongside the lease sweeper and
/// runtime flusher.
pub fn spawn_ack_timeout_sweeper(
    pipeline: Arc<ActionPipeline>,
    interval: Duration,
    shutdown: tokio_util::sync::CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => pipeline.sweep_stale_acks().await,
                _ = shutdown.cancelled() => break,
            }
        }
    })
}
