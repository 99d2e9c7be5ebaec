// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tunnel_edge::config::EdgeConfig;

#[derive(Debug, clap::Parser)]
#[command(name = "tunnel-edge", about = "Public edge for reverse HTTP/WebSocket tunnels")]
struct Cli {
    #[command(flatten)]
    config: EdgeConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    tunnel_edge::run(cli.config).await
}
