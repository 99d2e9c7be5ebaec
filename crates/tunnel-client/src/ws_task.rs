// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! §4.5.2: bridges a `PROXY_INIT`-upgraded substream to a WebSocket
//! connection against the local target.

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tunnel_core::mux::Stream as MuxStream;
use tunnel_core::protocol::{
    self, Headers, ProxyInitRequest, ProxyInitResponse, WebSocketClosePayload, WsFrameKind,
    TAG_PROXY_INIT, TAG_PROXY_WEBSOCKET_CLOSE, TAG_PROXY_WEBSOCKET_MESSAGE,
};

use crate::config::ClientConfig;

pub async fn handle(stream: MuxStream, request: ProxyInitRequest, config: &ClientConfig) -> anyhow::Result<()> {
    let (mut read_half, mut write_half) = tokio::io::split(stream);

    let local_url = to_local_ws_url(&config.local_target, &request.url);
    let mut client_request = local_url.as_str().into_client_request()?;
    apply_headers(&mut client_request, &request.headers)?;

    let local_socket = match tokio_tungstenite::connect_async(client_request).await {
        Ok((socket, _response)) => socket,
        Err(err) => {
            tracing::warn!(%err, url = local_url, "local websocket target unreachable");
            let reply = ProxyInitResponse {
                status_code: 502,
                status_message: "Bad Gateway".to_string(),
                headers: Headers::new(),
                set_cookies: Vec::new(),
            };
            protocol::write_json_frame(&mut write_half, TAG_PROXY_INIT, &reply).await?;
            return Ok(());
        }
    };

    let reply =
        ProxyInitResponse { status_code: 101, status_message: "Switching Protocols".to_string(), headers: Headers::new(), set_cookies: Vec::new() };
    protocol::write_json_frame(&mut write_half, TAG_PROXY_INIT, &reply).await?;

    let (mut local_sink, mut local_stream) = local_socket.split();

    let to_local = async move {
        loop {
            match protocol::read_frame(&mut read_half).await {
                Ok(Some((tag, payload))) if tag == TAG_PROXY_WEBSOCKET_MESSAGE => {
                    if let Ok((kind, data)) = protocol::decode_ws_message(payload) {
                        let msg = match kind {
                            WsFrameKind::Text => Message::Text(String::from_utf8_lossy(&data).into_owned().into()),
                            WsFrameKind::Binary => Message::Binary(data.to_vec().into()),
                        };
                        if local_sink.send(msg).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(Some((tag, payload))) if tag == TAG_PROXY_WEBSOCKET_CLOSE => {
                    let close: WebSocketClosePayload = protocol::decode_json_frame(&payload).unwrap_or_default();
                    let frame = close.code.map(|code| tokio_tungstenite::tungstenite::protocol::CloseFrame {
                        code: code.into(),
                        reason: close.reason.unwrap_or_default().into(),
                    });
                    let _ = local_sink.send(Message::Close(frame)).await;
                    break;
                }
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => break,
            }
        }
    };

    let to_tunnel = async move {
        while let Some(msg) = local_stream.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if protocol::write_ws_message(&mut write_half, WsFrameKind::Text, text.as_bytes()).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Binary(data)) => {
                    if protocol::write_ws_message(&mut write_half, WsFrameKind::Binary, &data).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(frame)) => {
                    let payload = WebSocketClosePayload {
                        code: protocol::sanitize_close_code(frame.as_ref().map(|f| f.code.into())),
                        reason: frame.map(|f| f.reason.to_string()),
                    };
                    let _ = protocol::write_json_frame(&mut write_half, TAG_PROXY_WEBSOCKET_CLOSE, &payload).await;
                    break;
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(err) => {
                    // "local errors map to code 1011 with the error message as reason" (§4.5.2).
                    let payload = WebSocketClosePayload { code: Some(1011), reason: Some(err.to_string()) };
                    let _ = protocol::write_json_frame(&mut write_half, TAG_PROXY_WEBSOCKET_CLOSE, &payload).await;
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = to_local => {}
        _ = to_tunnel => {}
    }
    Ok(())
}

/// Propagates `sec-websocket-protocol` and every other forwarded header onto
/// the outbound local WebSocket upgrade request (§4.5.2), skipping the
/// handful of headers `tungstenite` generates itself for this exact
/// handshake.
fn apply_headers(
    client_request: &mut tokio_tungstenite::tungstenite::handshake::client::Request,
    headers: &Headers,
) -> anyhow::Result<()> {
    for (name, value) in headers {
        if matches!(
            name.as_str(),
            "host" | "content-length" | "connection" | "upgrade" | "sec-websocket-key" | "sec-websocket-version" | "sec-websocket-extensions"
        ) {
            continue;
        }
        client_request.headers_mut().insert(
            tokio_tungstenite::tungstenite::http::HeaderName::try_from(name.as_str())?,
            value.parse()?,
        );
    }
    Ok(())
}

fn to_local_ws_url(local_target: &str, path: &str) -> String {
    let ws_base = if let Some(rest) = local_target.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = local_target.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        local_target.to_string()
    };
    format!("{}{}", ws_base.trim_end_matches('/'), path)
}
