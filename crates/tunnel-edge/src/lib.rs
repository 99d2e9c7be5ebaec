// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod config;
pub mod error;
pub mod state;
pub mod transport;

use std::sync::Arc;

use config::EdgeConfig;
use state::EdgeState;

/// Bind and serve the edge's public router until the process is killed.
/// Exposed as a library function so integration tests can build a router
/// directly without going through `main`.
pub async fn run(config: EdgeConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let router = build_router(config);

    tracing::info!(%addr, "tunnel-edge listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

/// Build the router for a fresh [`EdgeState`] seeded from `config`. Split out
/// from [`run`] so tests can mount it on an ephemeral port.
pub fn build_router(config: EdgeConfig) -> axum::Router {
    let state = Arc::new(EdgeState::new(config));
    transport::build_router(state)
}
