// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! End-to-end tests that spawn the real `tunnel-client` binary as a
//! subprocess against a real edge router and a real local target server, all
//! over real TCP (§8). Unlike `integration.rs`'s in-test stand-in for the
//! client runtime, this exercises `tunnel-client`'s own header propagation,
//! request/response replay, and WebSocket bridging exactly as deployed.

use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tunnel_edge::config::{EdgeConfig, RoutingMode};
use tunnel_specs::TunnelClientProcess;

const SERVER_SECRET: &str = "real-client-edge-secret";
const CLIENT_SECRET: &str = "real-client-secret";

async fn spawn_edge() -> std::net::SocketAddr {
    let config = EdgeConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        server_secret: SERVER_SECRET.to_string(),
        base_host: "example.test".to_string(),
        mode: RoutingMode::Subpath,
        tls: false,
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = tunnel_edge::build_router(config);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

#[derive(Clone, Default)]
struct LocalState;

async fn echo_headers(headers: axum::http::HeaderMap) -> impl IntoResponse {
    let cookie = headers.get("cookie").and_then(|v| v.to_str().ok()).unwrap_or("").to_string();
    let custom = headers.get("x-custom-header").and_then(|v| v.to_str().ok()).unwrap_or("").to_string();
    axum::Json(serde_json::json!({ "cookie": cookie, "x-custom-header": custom }))
}

async fn ws_echo(headers: axum::http::HeaderMap, ws: WebSocketUpgrade, State(_): State<LocalState>) -> impl IntoResponse {
    // Echoes only once `x-custom-header` has made it through the tunnel,
    // proving the real client binary propagated it rather than dropping it.
    let saw_custom_header = headers.get("x-custom-header").map(|v| v.as_bytes().to_vec());
    ws.on_upgrade(move |mut socket| async move {
        let Some(expected) = saw_custom_header else {
            let _ = socket.close().await;
            return;
        };
        if expected != b"ws-proxied-value" {
            let _ = socket.close().await;
            return;
        }
        while let Some(Ok(msg)) = socket.recv().await {
            if socket.send(msg).await.is_err() {
                break;
            }
        }
    })
}

/// Spawn a plain local target the real `tunnel-client` binary replays
/// requests against, returning its base `http://` URL.
async fn spawn_local_target() -> String {
    let router = Router::new()
        .route("/simple", get(|| async { "hello from local target" }))
        .route("/echo-headers", get(echo_headers))
        .route("/ws-echo", get(ws_echo))
        .with_state(LocalState);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Poll `/tunnel/<id>/simple` until the real client's control connection is
/// up (503 while it's still dialing/reconnecting).
async fn wait_for_tunnel(addr: std::net::SocketAddr, id: &str, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if tokio::time::Instant::now() > deadline {
            panic!("tunnel {id} never became reachable within {timeout:?}");
        }
        if let Ok(resp) = reqwest::get(format!("http://{addr}/tunnel/{id}/simple")).await {
            if resp.status() == 200 {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn real_client_proxies_http_round_trip() {
    let edge_addr = spawn_edge().await;
    let local_target = spawn_local_target().await;
    let id = tunnel_core::identity::derive(CLIENT_SECRET.as_bytes(), SERVER_SECRET.as_bytes());

    let server_url = format!("ws://{edge_addr}/api/tunnel/connect");
    let _client = TunnelClientProcess::spawn(&server_url, CLIENT_SECRET, &local_target).unwrap();

    wait_for_tunnel(edge_addr, id.as_str(), Duration::from_secs(10)).await;

    let resp = reqwest::get(format!("http://{edge_addr}/tunnel/{id}/simple")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "hello from local target");
}

#[tokio::test]
async fn real_client_propagates_cookie_and_custom_headers() {
    let edge_addr = spawn_edge().await;
    let local_target = spawn_local_target().await;
    let id = tunnel_core::identity::derive(CLIENT_SECRET.as_bytes(), SERVER_SECRET.as_bytes());

    let server_url = format!("ws://{edge_addr}/api/tunnel/connect");
    let _client = TunnelClientProcess::spawn(&server_url, CLIENT_SECRET, &local_target).unwrap();

    wait_for_tunnel(edge_addr, id.as_str(), Duration::from_secs(10)).await;

    let resp = reqwest::Client::new()
        .get(format!("http://{edge_addr}/tunnel/{id}/echo-headers"))
        .header("cookie", "session=abc123")
        .header("x-custom-header", "proxied-value")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["cookie"], "session=abc123");
    assert_eq!(body["x-custom-header"], "proxied-value");
}

#[tokio::test]
async fn real_client_bridges_websocket_with_custom_header() {
    let edge_addr = spawn_edge().await;
    let local_target = spawn_local_target().await;
    let id = tunnel_core::identity::derive(CLIENT_SECRET.as_bytes(), SERVER_SECRET.as_bytes());

    let server_url = format!("ws://{edge_addr}/api/tunnel/connect");
    let _client = TunnelClientProcess::spawn(&server_url, CLIENT_SECRET, &local_target).unwrap();

    wait_for_tunnel(edge_addr, id.as_str(), Duration::from_secs(10)).await;

    let url = format!("ws://{edge_addr}/tunnel/{id}/ws-echo");
    let mut request = {
        use tokio_tungstenite::tungstenite::client::IntoClientRequest;
        url.into_client_request().unwrap()
    };
    request.headers_mut().insert("x-custom-header", "ws-proxied-value".parse().unwrap());

    let (mut socket, response) = tokio_tungstenite::connect_async(request).await.unwrap();
    assert_eq!(response.status(), 101);

    socket.send(WsMessage::Text("ping".into())).await.unwrap();
    let reply = socket.next().await.unwrap().unwrap();
    assert_eq!(reply, WsMessage::Text("ping".into()));
}
