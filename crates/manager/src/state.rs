// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared application state threaded through every axum handler. Built once
//! at startup and passed explicitly — no implicit singletons, so tests can
//! construct hermetic instances (spec §9 "Global mutable state").

use std::sync::Arc;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::audit::AuditService;
use crate::auth::jwt::JwtVerifier;
use crate::auth::publish_token::PublishTokenIssuer;
use crate::broker::BrokerStream;
use crate::config::ManagerConfig;
use crate::fastpath::webrtc::IceConfig;
use crate::fastpath::FastPathRegistry;
use crate::handshake::HandshakeCoordinator;
use crate::lease::manager::LeaseManager;
use crate::pipeline::ActionPipeline;
use crate::session::registry::SessionRegistry;
use crate::telemetry::Metrics;

pub struct AppState {
    pub config: ManagerConfig,
    pub db: PgPool,
    pub sessions: Arc<SessionRegistry>,
    pub leases: Arc<LeaseManager>,
    pub fastpath: Arc<FastPathRegistry>,
    pub broker: Arc<BrokerStream>,
    pub audit: Arc<AuditService>,
    pub pipeline: Arc<ActionPipeline>,
    pub handshake: Arc<HandshakeCoordinator>,
    pub metrics: Arc<Metrics>,
    pub jwt_verifier: Arc<JwtVerifier>,
    pub publish_tokens: Arc<PublishTokenIssuer>,
    pub ice_config: IceConfig,
    pub shutdown: CancellationToken,
}
