// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Beach Manager: the zero-trust control plane mediating between session
//! hosts, operators, and automation agents. Wires the Session Registry,
//! Controller Lease Manager, Action Pipeline, Fast-Path Transport Session,
//! and Attach & Handshake Coordinator behind one axum HTTP surface.

pub mod audit;
pub mod auth;
pub mod broker;
pub mod config;
pub mod error;
pub mod fastpath;
pub mod handshake;
pub mod http;
pub mod lease;
pub mod pipeline;
pub mod session;
pub mod state;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::audit::AuditService;
use crate::auth::jwt::{spawn_jwks_refresh, JwtVerifier};
use crate::auth::publish_token::PublishTokenIssuer;
use crate::broker::BrokerStream;
use crate::config::ManagerConfig;
use crate::fastpath::webrtc::IceConfig;
use crate::fastpath::FastPathRegistry;
use crate::handshake::{spawn_handshake_rotation_sweeper, HandshakeCoordinator};
use crate::lease::manager::LeaseManager;
use crate::lease::sweeper::spawn_lease_sweeper;
use crate::pipeline::{spawn_ack_timeout_sweeper, ActionPipeline};
use crate::session::directory::HttpSessionDirectory;
use crate::session::registry::SessionRegistry;
use crate::session::sweeper::{spawn_runtime_flusher, spawn_stale_session_sweeper};
use crate::state::AppState;
use crate::telemetry::Metrics;

/// A grace window past `expires_at` before a lease is marked `expired_at`,
/// keeping a lease that is renewed right at the boundary from flapping.
const LEASE_SWEEP_GRACE: chrono::Duration = chrono::Duration::seconds(30);
const LEASE_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const ACK_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
const RUNTIME_FLUSH_INTERVAL: Duration = Duration::from_secs(10);
const HANDSHAKE_ROTATION_INTERVAL: Duration = Duration::from_secs(60);
const JWKS_REFRESH_INTERVAL: Duration = Duration::from_secs(300);

/// Build every long-lived service, spawn the background sweepers, and serve
/// the HTTP surface until `shutdown` fires or the process receives a signal.
pub async fn run(config: ManagerConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();

    let db = PgPoolOptions::new().max_connections(20).connect(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let nats = async_nats::connect(&config.broker_url).await?;
    let broker = Arc::new(BrokerStream::new(
        nats,
        Duration::from_secs(config.queue_visibility_timeout_secs),
        config.broker_replay_retention(),
    ));
    broker.ensure_stream().await?;

    let audit = Arc::new(AuditService::new(db.clone()));
    let directory = Arc::new(HttpSessionDirectory::new(config.session_directory_url.clone()));
    let sessions = Arc::new(SessionRegistry::new(db.clone(), config.manager_url.clone(), directory, audit.clone()));
    let leases = Arc::new(LeaseManager::new(db.clone(), audit.clone()));
    let fastpath = Arc::new(FastPathRegistry::new());
    let metrics = Arc::new(Metrics::new()?);

    let pipeline = Arc::new(ActionPipeline::new(
        leases.clone(),
        sessions.clone(),
        fastpath.clone(),
        broker.clone(),
        audit.clone(),
        metrics.clone(),
        &config,
    ));

    let publish_tokens = Arc::new(PublishTokenIssuer::new(&config.publish_token_secret));
    let handshake = Arc::new(HandshakeCoordinator::new(
        sessions.clone(),
        leases.clone(),
        publish_tokens.clone(),
        audit.clone(),
        config.manager_url.clone(),
    ));

    let jwt_verifier = Arc::new(JwtVerifier::new(
        config.jwks_url.clone(),
        config.jwt_issuer.clone(),
        config.jwt_audience.clone(),
        config.auth_bypass,
    ));
    if let Err(e) = jwt_verifier.refresh().await {
        tracing::warn!(err = %e, "initial jwks fetch failed, starting with an empty cache");
    }

    let ice_config = IceConfig {
        public_ip: config.ice_public_ip.clone(),
        port_start: config.ice_port_start,
        port_end: config.ice_port_end,
    };

    let bind_addr = config.bind_addr.clone();

    let state = Arc::new(AppState {
        config,
        db,
        sessions: sessions.clone(),
        leases: leases.clone(),
        fastpath,
        broker,
        audit,
        pipeline: pipeline.clone(),
        handshake: handshake.clone(),
        metrics,
        jwt_verifier: jwt_verifier.clone(),
        publish_tokens,
        ice_config,
        shutdown: shutdown.clone(),
    });

    spawn_stale_session_sweeper(
        sessions.clone(),
        state.config.stale_session_max_idle(),
        state.config.viewer_health_report_interval(),
        shutdown.clone(),
    );
    spawn_runtime_flusher(sessions, RUNTIME_FLUSH_INTERVAL, shutdown.clone());
    spawn_lease_sweeper(leases, LEASE_SWEEP_GRACE, LEASE_SWEEP_INTERVAL, shutdown.clone());
    spawn_ack_timeout_sweeper(pipeline, ACK_SWEEP_INTERVAL, shutdown.clone());
    spawn_handshake_rotation_sweeper(handshake, HANDSHAKE_ROTATION_INTERVAL, shutdown.clone());
    spawn_jwks_refresh(jwt_verifier, JWKS_REFRESH_INTERVAL, shutdown.clone());

    let router = http::build_router(state);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "beach-manager listening");

    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal(shutdown)).await?;

    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut sig) = signal(SignalKind::terminate()) {
            sig.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received");
    shutdown.cancel();
}
