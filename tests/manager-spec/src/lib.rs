// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Black-box harness wiring a real `beach-manager` router against live
//! Postgres and NATS. Gated behind `MANAGER_INTEGRATION_TESTS`, the same way
//! the cli crate gates its container-backed tests behind `COOP_DOCKER_TESTS`:
//! `SessionRegistry`, `LeaseManager`, `AuditService`, and `BrokerStream` are
//! all sqlx/NATS-backed rather than trait objects, so there is no in-memory
//! fake to substitute the way `MuxState` lets the mux crate's own tests skip
//! infrastructure entirely.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use beach_manager::audit::AuditService;
use beach_manager::auth::jwt::JwtVerifier;
use beach_manager::auth::publish_token::PublishTokenIssuer;
use beach_manager::broker::BrokerStream;
use beach_manager::config::ManagerConfig;
use beach_manager::fastpath::webrtc::IceConfig;
use beach_manager::fastpath::FastPathRegistry;
use beach_manager::handshake::HandshakeCoordinator;
use beach_manager::lease::manager::LeaseManager;
use beach_manager::pipeline::ActionPipeline;
use beach_manager::session::directory::{DirectoryError, SessionDirectory};
use beach_manager::session::registry::SessionRegistry;
use beach_manager::state::AppState;
use beach_manager::telemetry::Metrics;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Skips (not fails) the calling test unless `MANAGER_INTEGRATION_TESTS` is
/// set. A run without real Postgres/NATS should see a note, not red CI.
#[macro_export]
macro_rules! skip_unless_integration {
    () => {
        if std::env::var("MANAGER_INTEGRATION_TESTS").is_err() {
            eprintln!("skipping: MANAGER_INTEGRATION_TESTS not set");
            return;
        }
    };
}

/// Records code/ownership claims the test controls in place of the external
/// identity provider `HttpSessionDirectory` talks to in production.
#[derive(Default)]
pub struct FakeSessionDirectory {
    valid_codes: RwLock<HashMap<Uuid, String>>,
    owners: RwLock<HashMap<Uuid, String>>,
}

impl FakeSessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_code(&self, session_id: Uuid, code: impl Into<String>) {
        self.valid_codes.write().await.insert(session_id, code.into());
    }

    pub async fn set_owner(&self, session_id: Uuid, owner: impl Into<String>) {
        self.owners.write().await.insert(session_id, owner.into());
    }
}

#[async_trait]
impl SessionDirectory for FakeSessionDirectory {
    async fn verify_code(&self, session_id: Uuid, code: &str) -> Result<bool, DirectoryError> {
        Ok(self.valid_codes.read().await.get(&session_id).map(|c| c == code).unwrap_or(false))
    }

    async fn verify_ownership(&self, session_id: Uuid, requester: &str) -> Result<bool, DirectoryError> {
        Ok(self.owners.read().await.get(&session_id).map(|o| o == requester).unwrap_or(false))
    }
}

/// Everything a scenario test needs: an in-process HTTP server plus direct
/// handles to the session registry, fast-path registry, and fake directory
/// so a test can reach into state the HTTP surface doesn't expose (e.g.
/// flipping `transport_mode` to simulate a WebRTC handshake we have no real
/// peer to drive end to end).
pub struct Harness {
    pub server: axum_test::TestServer,
    pub sessions: Arc<SessionRegistry>,
    pub fastpath: Arc<FastPathRegistry>,
    pub directory: Arc<FakeSessionDirectory>,
    pub publish_tokens: Arc<PublishTokenIssuer>,
}

fn test_config() -> ManagerConfig {
    ManagerConfig {
        bind_addr: "127.0.0.1:0".to_owned(),
        database_url: String::new(),
        manager_url: "https://manager.test.internal".to_owned(),
        session_directory_url: "http://unused.invalid".to_owned(),
        broker_url: std::env::var("BROKER_URL").unwrap_or_else(|_| "nats://127.0.0.1:4222".to_owned()),
        jwks_url: None,
        jwt_issuer: None,
        jwt_audience: None,
        auth_bypass: true,
        publish_token_secret: "integration-test-secret".to_owned(),
        controller_strict_gating: true,
        stale_session_max_idle_ms: 60_000,
        viewer_health_report_interval_ms: 15_000,
        ice_public_ip: None,
        ice_port_start: 50_000,
        ice_port_end: 50_100,
        broker_replay_retention_secs: 600,
        rate_limit_sustained: 30,
        rate_limit_burst: 60,
        queue_backpressure_high: 500,
        queue_backpressure_low: 400,
        queue_visibility_timeout_secs: 30,
        action_dedupe_window: 2048,
        log_format: "pretty".to_owned(),
    }
}

/// Builds a full `AppState` against live Postgres and NATS and wraps its
/// router in an `axum_test::TestServer`, following `mux/tests/integration.rs`'s
/// direct-state-construction convention. Only reachable once
/// `skip_unless_integration!()` has already let the test through, so the
/// `expect()`s below are the teacher's own test-crate idiom, not an
/// assertion about production behavior.
pub async fn build() -> Harness {
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set alongside MANAGER_INTEGRATION_TESTS");

    let db = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("connect to postgres");
    sqlx::migrate!("../../crates/manager/migrations").run(&db).await.expect("run migrations");

    let config = test_config();

    let nats = async_nats::connect(&config.broker_url).await.expect("connect to nats");
    let broker = Arc::new(BrokerStream::new(
        nats,
        config.queue_visibility_timeout(),
        config.broker_replay_retention(),
    ));
    broker.ensure_stream().await.expect("ensure broker stream");

    let audit = Arc::new(AuditService::new(db.clone()));
    let directory = Arc::new(FakeSessionDirectory::new());
    let sessions = Arc::new(SessionRegistry::new(
        db.clone(),
        config.manager_url.clone(),
        directory.clone(),
        audit.clone(),
    ));
    let leases = Arc::new(LeaseManager::new(db.clone(), audit.clone()));
    let fastpath = Arc::new(FastPathRegistry::new());
    let metrics = Arc::new(Metrics::new().expect("construct metrics registry"));

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

    let ice_config = IceConfig {
        public_ip: config.ice_public_ip.clone(),
        port_start: config.ice_port_start,
        port_end: config.ice_port_end,
    };

    let state = Arc::new(AppState {
        config,
        db,
        sessions: sessions.clone(),
        leases: leases.clone(),
        fastpath: fastpath.clone(),
        broker,
        audit,
        pipeline,
        handshake,
        metrics,
        jwt_verifier,
        publish_tokens: publish_tokens.clone(),
        ice_config,
        shutdown: CancellationToken::new(),
    });

    let router = beach_manager::http::build_router(state);
    let server = axum_test::TestServer::new(router).expect("build test server");

    Harness { server, sessions, fastpath, directory, publish_tokens }
}

/// Default bearer header for a user principal under `AUTH_BYPASS=true` — the
/// token content is irrelevant, only its presence as `Bearer <anything>`.
pub const USER_BEARER: &str = "Bearer dev-bypass";
