// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

/// Configuration for the client runtime (§6).
#[derive(Debug, Clone, clap::Args)]
pub struct ClientConfig {
    /// Edge control endpoint, e.g. `wss://edge.example.com/api/tunnel/connect`.
    #[arg(long, env = "TUNNEL_CLIENT_SERVER_URL")]
    pub server_url: String,

    /// Shared secret used to derive this tunnel's id (§4.1). Required.
    #[arg(long, env = "TUNNEL_CLIENT_SECRET")]
    pub client_secret: String,

    /// Base URL of the local target every proxied request is replayed
    /// against, e.g. `http://localhost:3000`.
    #[arg(long, env = "TUNNEL_CLIENT_LOCAL_TARGET")]
    pub local_target: String,

    /// Liveness ping interval, milliseconds.
    #[arg(long, default_value_t = 20_000, env = "TUNNEL_CLIENT_PING_INTERVAL_MS")]
    pub ping_interval_ms: u64,

    /// How long to wait for a pong before treating the control socket as
    /// dead and reconnecting.
    #[arg(long, default_value_t = 10_000, env = "TUNNEL_CLIENT_PONG_TIMEOUT_MS")]
    pub pong_timeout_ms: u64,

    /// Reconnect backoff base delay, milliseconds (§6, resolved open
    /// question: base=250ms, factor=1.5, cap=10s, jitter=±20%).
    #[arg(long, default_value_t = 250, env = "TUNNEL_CLIENT_BACKOFF_BASE_MS")]
    pub backoff_base_ms: u64,

    #[arg(long, default_value_t = 1.5, env = "TUNNEL_CLIENT_BACKOFF_FACTOR")]
    pub backoff_factor: f64,

    #[arg(long, default_value_t = 10_000, env = "TUNNEL_CLIENT_BACKOFF_CAP_MS")]
    pub backoff_cap_ms: u64,
}
