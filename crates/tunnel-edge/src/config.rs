// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::ValueEnum;

/// Id-extraction strategy for the edge front door (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "kebab-case")]
pub enum RoutingMode {
    /// `<id>.<base_host>/*`.
    Wildcard,
    /// `/tunnel/<id>/*`.
    Subpath,
}

/// Configuration for the edge process.
#[derive(Debug, Clone, clap::Args)]
pub struct EdgeConfig {
    /// Host to bind on.
    #[arg(long, default_value = "0.0.0.0", env = "TUNNEL_EDGE_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080, env = "TUNNEL_EDGE_PORT")]
    pub port: u16,

    /// Secret used to derive and verify tunnel ids (§4.1). Required.
    #[arg(long, env = "TUNNEL_EDGE_SERVER_SECRET")]
    pub server_secret: String,

    /// Public base host used to build the announced tunnel URL, and (in
    /// wildcard mode) to extract the tunnel id from the request Host header.
    #[arg(long, env = "TUNNEL_EDGE_BASE_HOST")]
    pub base_host: String,

    /// Id-extraction strategy.
    #[arg(long, value_enum, default_value_t = RoutingMode::Subpath, env = "TUNNEL_EDGE_MODE")]
    pub mode: RoutingMode,

    /// Whether the announced public URL uses `https`/`wss` (true) or
    /// `http`/`ws` (false).
    #[arg(long, default_value_t = true, env = "TUNNEL_EDGE_TLS")]
    pub tls: bool,
}

impl EdgeConfig {
    pub fn http_scheme(&self) -> &'static str {
        if self.tls {
            "https"
        } else {
            "http"
        }
    }

    /// Build the public URL announced to a client in `ConnectionEstablished`
    /// for a given tunnel id, honoring the configured routing mode.
    pub fn public_url(&self, id: &tunnel_core::TunnelId) -> String {
        match self.mode {
            RoutingMode::Wildcard => {
                format!("{}://{}.{}", self.http_scheme(), id, self.base_host)
            }
            RoutingMode::Subpath => {
                format!("{}://{}/tunnel/{}", self.http_scheme(), self.base_host, id)
            }
        }
    }
}
