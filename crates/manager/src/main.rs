// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use beach_manager::config::ManagerConfig;

#[tokio::main]
async fn main() {
    let config = ManagerConfig::parse();
    beach_manager::telemetry::init_tracing(&config);

    if let Err(e) = beach_manager::run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
