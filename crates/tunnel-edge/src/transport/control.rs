// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C4: accepting and running the single control `WebSocket` per tunnel id.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tunnel_core::mux::{mode_for, Multiplexer};
use tunnel_core::protocol::ConnectionEstablished;
use tunnel_core::identity;

use crate::error::TunnelError;
use crate::state::EdgeState;
use crate::transport::auth::extract_client_secret;
use crate::transport::ws_io::WsDuplex;

/// `GET /api/tunnel/connect` — validates the upgrade request, derives the
/// tunnel id, and upgrades to the control `WebSocket` (§4.1, §4.2).
pub async fn connect(
    State(state): State<Arc<EdgeState>>,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let Some(ws) = ws else {
        return TunnelError::NotWebSocket.to_json_response("Expected a WebSocket upgrade request").into_response();
    };

    let client_secret = match extract_client_secret(&headers) {
        Ok(secret) => secret,
        Err(err) => return err.to_json_response("Missing tunnel client secret").into_response(),
    };

    let id = identity::derive(client_secret.as_bytes(), state.config.server_secret.as_bytes());

    ws.on_upgrade(move |socket| run_control_socket(state, id, socket))
        .into_response()
}

async fn run_control_socket(state: Arc<EdgeState>, id: tunnel_core::TunnelId, mut socket: WebSocket) {
    let established = ConnectionEstablished { id: id.to_string(), url: state.config.public_url(&id) };
    let payload = match serde_json::to_string(&established) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::error!(%err, "failed to encode ConnectionEstablished");
            return;
        }
    };
    if socket.send(Message::Text(payload.into())).await.is_err() {
        return;
    }

    let (duplex, closer) = WsDuplex::new(socket);
    let multiplexer = Multiplexer::new(duplex, mode_for(true));
    let control = multiplexer.control.clone();

    let session = state.session(&id).await;
    let (generation, evicted) = session.accept_control(control, closer).await;
    if let Some(evicted) = evicted {
        *evicted.closer.lock().unwrap_or_else(|e| e.into_inner()) =
            Some((1000, "a new client has connected".to_string()));
        let mut stale = evicted.control.clone();
        let _ = stale.close().await;
        tracing::info!(tunnel_id = %id, "evicted previous control socket");
    }

    tracing::info!(tunnel_id = %id, "control socket connected");

    // The edge never expects the client to open substreams of its own; any
    // inbound stream here is unexpected and simply dropped.
    let mut inbound = multiplexer.inbound;
    while inbound.recv().await.is_some() {
        tracing::warn!(tunnel_id = %id, "ignoring unexpected client-initiated substream");
    }

    session.clear_control_if_current(generation).await;
    tracing::info!(tunnel_id = %id, "control socket disconnected");
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
