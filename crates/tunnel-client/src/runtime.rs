// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C6: the client's connect/reconnect loop, liveness, and per-substream
//! dispatch.

use std::time::Duration;

use futures_util::StreamExt;
use rand::Rng;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tunnel_core::mux::{mode_for, Multiplexer, Stream as MuxStream};
use tunnel_core::protocol::{self, ConnectionEstablished, ProxyInitRequest, TAG_PROXY_INIT};

use crate::config::ClientConfig;
use crate::{http_task, ws_task};
use crate::ws_io::WsDuplex;

/// Drive the reconnect loop until `shutdown` is cancelled.
pub async fn run(config: ClientConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let mut attempt: u32 = 0;
    while !shutdown.is_cancelled() {
        match connect_and_serve(&config, shutdown.clone(), &mut attempt).await {
            Ok(()) => {}
            Err(err) => {
                tracing::warn!(%err, "control connection lost");
            }
        }
        if shutdown.is_cancelled() {
            break;
        }
        let delay = backoff_delay(attempt, &config);
        tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
        attempt = attempt.saturating_add(1);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => {}
        }
    }
    Ok(())
}

/// Exponential backoff with jitter: `min(cap, base * factor^attempt) + base * 0.2 * U(0,1)`.
fn backoff_delay(attempt: u32, config: &ClientConfig) -> Duration {
    let base = config.backoff_base_ms as f64;
    let exp = base * config.backoff_factor.powi(attempt as i32);
    let capped = exp.min(config.backoff_cap_ms as f64);
    let jitter = base * 0.2 * rand::rng().random::<f64>();
    Duration::from_millis((capped + jitter).round() as u64)
}

async fn connect_and_serve(
    config: &ClientConfig,
    shutdown: CancellationToken,
    attempt: &mut u32,
) -> anyhow::Result<()> {
    let mut request = config.server_url.as_str().into_client_request()?;
    request
        .headers_mut()
        .insert("x-tunnel-secret", config.client_secret.parse()?);

    let (mut socket, _response) = tokio_tungstenite::connect_async(request).await?;

    let established = loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => {
                break serde_json::from_str::<ConnectionEstablished>(&text)?;
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(other)) => anyhow::bail!("expected ConnectionEstablished, got {other:?}"),
            Some(Err(err)) => return Err(err.into()),
            None => anyhow::bail!("control socket closed before handshake"),
        }
    };
    tracing::info!(tunnel_id = %established.id, url = %established.url, "tunnel connected");
    *attempt = 0;

    let ping_interval = Duration::from_millis(config.ping_interval_ms);
    let pong_timeout = Duration::from_millis(config.pong_timeout_ms);
    let duplex = WsDuplex::new(socket, ping_interval, pong_timeout);
    let multiplexer = Multiplexer::new(duplex, mode_for(false));
    let mut inbound = multiplexer.inbound;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(()),
            stream = inbound.recv() => {
                match stream {
                    Some(stream) => {
                        let cfg = config.clone();
                        tokio::spawn(async move {
                            if let Err(err) = dispatch(stream, cfg).await {
                                tracing::warn!(%err, "proxy substream failed");
                            }
                        });
                    }
                    None => return Ok(()),
                }
            }
        }
    }
}

/// Read the `PROXY_INIT` request off a freshly opened substream and route it
/// to the HTTP or WebSocket task based on whether it carries an `Upgrade`
/// header (§4.5.1, §4.5.2).
async fn dispatch(mut stream: MuxStream, config: ClientConfig) -> anyhow::Result<()> {
    let Some((tag, payload)) = protocol::read_frame(&mut stream).await? else {
        anyhow::bail!("substream closed before PROXY_INIT");
    };
    if tag != TAG_PROXY_INIT {
        anyhow::bail!("expected PROXY_INIT, got tag {tag}");
    }
    let request: ProxyInitRequest = protocol::decode_json_frame(&payload)?;

    let is_upgrade = request
        .headers
        .get("upgrade")
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if is_upgrade {
        ws_task::handle(stream, request, &config).await
    } else {
        http_task::handle(stream, request, &config).await
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
