// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C5: the public-facing front door. Extracts a tunnel id from the inbound
//! request (wildcard subdomain or subpath, per [`crate::config::RoutingMode`]),
//! opens a fresh substream on that tunnel's control connection, and proxies
//! the request (or bridges a WebSocket) over it.

use std::io;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::io::{AsyncWriteExt, ReadHalf};
use tunnel_core::mux::Stream as MuxStream;
use tunnel_core::protocol::{
    self, Headers, ProxyInitRequest, ProxyInitResponse, WebSocketClosePayload, WsFrameKind,
    TAG_PROXY_BODY, TAG_PROXY_DATA, TAG_PROXY_INIT, TAG_PROXY_WEBSOCKET_CLOSE,
};
use tunnel_core::TunnelId;

use crate::config::RoutingMode;
use crate::error::TunnelError;
use crate::state::{EdgeState, PeerEvent};

/// Extracted tunnel id plus the path (and query) the local target should see.
struct Target {
    id: TunnelId,
    path: String,
}

fn extract_target(state: &EdgeState, headers: &HeaderMap, uri: &Uri) -> Result<Target, TunnelError> {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/").to_string();

    match state.config.mode {
        RoutingMode::Wildcard => {
            let host = headers
                .get(axum::http::header::HOST)
                .and_then(|v| v.to_str().ok())
                .ok_or(TunnelError::UnknownId)?;
            let host = host.split(':').next().unwrap_or(host);
            let suffix = format!(".{}", state.config.base_host);
            let label = host.strip_suffix(&suffix).ok_or(TunnelError::UnknownId)?;
            let id = TunnelId::parse(label).ok_or(TunnelError::UnknownId)?;
            Ok(Target { id, path: path_and_query })
        }
        RoutingMode::Subpath => {
            let path = uri.path();
            let rest = path.strip_prefix("/tunnel/").ok_or(TunnelError::UnknownId)?;
            let (label, tail) = rest.split_once('/').unwrap_or((rest, ""));
            let id = TunnelId::parse(label).ok_or(TunnelError::UnknownId)?;
            let mut forwarded = format!("/{tail}");
            if let Some(query) = uri.query() {
                forwarded.push('?');
                forwarded.push_str(query);
            }
            Ok(Target { id, path: forwarded })
        }
    }
}

fn to_proxy_headers(headers: &HeaderMap) -> Headers {
    let mut out = Headers::new();
    for (name, value) in headers.iter() {
        // `connection`/`sec-websocket-key`/`sec-websocket-version` describe
        // the public-facing handshake the edge already terminated; the
        // client performs its own handshake against the local target. The
        // `upgrade` header is kept so the client's dispatch can tell a
        // WebSocket substream from a plain HTTP one (§4.5.2).
        if matches!(name.as_str(), "connection" | "sec-websocket-key" | "sec-websocket-version") {
            continue;
        }
        if let Ok(v) = value.to_str() {
            out.insert(name.as_str().to_string(), v.to_string());
        }
    }
    out
}

fn from_proxy_headers(headers: &Headers, set_cookies: &[String]) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
            out.append(name, value);
        }
    }
    for cookie in set_cookies {
        if let Ok(value) = HeaderValue::from_str(cookie) {
            out.append(axum::http::header::SET_COOKIE, value);
        }
    }
    out
}

/// `GET|POST|...` catch-all: proxies a plain HTTP request, or bridges a
/// WebSocket upgrade, over a fresh substream of the tunnel's control
/// connection (§4.4, §4.5).
pub async fn proxy(
    State(state): State<Arc<EdgeState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
    body: Body,
) -> Response {
    let target = match extract_target(&state, &headers, &uri) {
        Ok(t) => t,
        Err(err) => return err.to_json_response("Unknown tunnel id").into_response(),
    };

    let session = match state.existing_session(&target.id).await {
        Some(session) => session,
        None => return TunnelError::NoClientConnected.to_json_response("No client connected").into_response(),
    };
    let Some(control_handle) = session.control().await else {
        return TunnelError::NoClientConnected.to_json_response("No client connected").into_response();
    };

    let mut control = control_handle.control.clone();
    let stream = match control.open_stream().await {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(tunnel_id = %target.id, %err, "failed to open proxy substream");
            return TunnelError::UpstreamTransportFailure
                .to_json_response("Failed to reach tunnel client")
                .into_response();
        }
    };

    if let Some(ws) = ws {
        return ws
            .on_upgrade(move |socket| bridge_websocket(session, target.id, target.path, to_proxy_headers(&headers), stream, socket))
            .into_response();
    }

    proxy_http(method, target.path, to_proxy_headers(&headers), body, stream).await
}

async fn proxy_http(method: Method, path: String, headers: Headers, body: Body, stream: MuxStream) -> Response {
    let (mut read_half, mut write_half) = tokio::io::split(stream);

    let init = ProxyInitRequest { method: method.as_str().to_string(), url: path, headers };
    if let Err(err) = protocol::write_json_frame(&mut write_half, TAG_PROXY_INIT, &init).await {
        tracing::warn!(%err, "failed to write PROXY_INIT");
        return TunnelError::UpstreamTransportFailure.to_json_response("Failed to reach tunnel client").into_response();
    }

    let mut data = body.into_data_stream();
    while let Some(chunk) = data.next().await {
        match chunk {
            Ok(chunk) => {
                if protocol::write_body_chunk(&mut write_half, TAG_PROXY_DATA, &chunk).await.is_err() {
                    return TunnelError::UpstreamTransportFailure
                        .to_json_response("Failed to reach tunnel client")
                        .into_response();
                }
            }
            Err(_) => break,
        }
    }
    let _ = protocol::write_body_chunk(&mut write_half, TAG_PROXY_DATA, &[]).await;

    let reply = match protocol::read_frame(&mut read_half).await {
        Ok(Some((tag, payload))) if tag == TAG_PROXY_INIT => {
            match protocol::decode_json_frame::<ProxyInitResponse>(&payload) {
                Ok(reply) => reply,
                Err(err) => {
                    tracing::warn!(%err, "malformed PROXY_INIT reply");
                    return TunnelError::UpstreamTransportFailure
                        .to_json_response("Malformed response from tunnel client")
                        .into_response();
                }
            }
        }
        _ => {
            return TunnelError::UpstreamTransportFailure
                .to_json_response("Tunnel client closed before replying")
                .into_response();
        }
    };

    let status = StatusCode::from_u16(reply.status_code).unwrap_or(StatusCode::BAD_GATEWAY);
    let header_map = from_proxy_headers(&reply.headers, &reply.set_cookies);

    let no_body = matches!(status.as_u16(), 204 | 205 | 304);
    let axum_body = if no_body { Body::empty() } else { Body::from_stream(proxy_body_stream(read_half)) };

    let mut response = Response::new(axum_body);
    *response.status_mut() = status;
    *response.headers_mut() = header_map;
    response
}

fn proxy_body_stream(reader: ReadHalf<MuxStream>) -> impl Stream<Item = io::Result<Bytes>> + Send {
    futures_util::stream::unfold(Some(reader), |state| async move {
        let mut reader = state?;
        match protocol::read_frame(&mut reader).await {
            Ok(Some((tag, payload))) if tag == TAG_PROXY_BODY && !payload.is_empty() => {
                Some((Ok(payload), Some(reader)))
            }
            Ok(Some((tag, _))) if tag == TAG_PROXY_BODY => None, // zero-length terminator
            Ok(Some(_)) => Some((Err(io::Error::new(io::ErrorKind::InvalidData, "unexpected frame in body")), None)),
            Ok(None) => None,
            Err(e) => Some((Err(e), None)),
        }
    })
}

/// Bridges a public WebSocket to the tunnel substream opened for it, per
/// §4.5.2. The substream carries `PROXY_INIT` (status 101 reply) followed by
/// `PROXY_WEBSOCKET_MESSAGE`/`PROXY_WEBSOCKET_CLOSE` frames in both
/// directions for the remainder of its life.
async fn bridge_websocket(
    session: Arc<crate::state::Session>,
    tunnel_id: TunnelId,
    path: String,
    headers: Headers,
    stream: MuxStream,
    public_socket: WebSocket,
) {
    let (mut read_half, mut write_half) = tokio::io::split(stream);

    let init = ProxyInitRequest { method: "GET".to_string(), url: path, headers };
    if protocol::write_json_frame(&mut write_half, TAG_PROXY_INIT, &init).await.is_err() {
        let _ = public_socket.close().await;
        return;
    }

    match protocol::read_frame(&mut read_half).await {
        Ok(Some((tag, payload))) if tag == TAG_PROXY_INIT => {
            match protocol::decode_json_frame::<ProxyInitResponse>(&payload) {
                Ok(reply) if reply.status_code == 101 => {}
                _ => {
                    let _ = public_socket.close().await;
                    return;
                }
            }
        }
        _ => {
            let _ = public_socket.close().await;
            return;
        }
    }

    let local_id = session.next_local_stream_id();
    let (peer_tx, mut peer_rx) = tokio::sync::mpsc::unbounded_channel::<PeerEvent>();
    session.proxied_websockets.write().await.insert(local_id, peer_tx);

    let (mut public_sink, mut public_stream) = public_socket.split();

    let to_client = async move {
        while let Some(msg) = public_stream.next().await {
            match msg {
                Ok(AxumMessage::Text(text)) => {
                    if protocol::write_ws_message(&mut write_half, WsFrameKind::Text, text.as_bytes()).await.is_err() {
                        break;
                    }
                }
                Ok(AxumMessage::Binary(data)) => {
                    if protocol::write_ws_message(&mut write_half, WsFrameKind::Binary, &data).await.is_err() {
                        break;
                    }
                }
                Ok(AxumMessage::Close(frame)) => {
                    let payload = WebSocketClosePayload {
                        code: protocol::sanitize_close_code(frame.as_ref().map(|f| f.code)),
                        reason: frame.map(|f| f.reason.to_string()),
                    };
                    let _ = protocol::write_json_frame(&mut write_half, TAG_PROXY_WEBSOCKET_CLOSE, &payload).await;
                    break;
                }
                Ok(AxumMessage::Ping(_) | AxumMessage::Pong(_)) => continue,
                Err(_) => break,
            }
        }
        let _ = write_half.shutdown().await;
    };

    let from_client = async move {
        loop {
            match protocol::read_frame(&mut read_half).await {
                Ok(Some((tag, payload))) if tag == tunnel_core::protocol::TAG_PROXY_WEBSOCKET_MESSAGE => {
                    if let Ok((kind, data)) = protocol::decode_ws_message(payload) {
                        let msg = match kind {
                            WsFrameKind::Text => {
                                AxumMessage::Text(String::from_utf8_lossy(&data).into_owned().into())
                            }
                            WsFrameKind::Binary => AxumMessage::Binary(data),
                        };
                        if public_sink.send(msg).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(Some((tag, payload))) if tag == TAG_PROXY_WEBSOCKET_CLOSE => {
                    let close: WebSocketClosePayload = protocol::decode_json_frame(&payload).unwrap_or_default();
                    let frame = close.code.map(|code| axum::extract::ws::CloseFrame {
                        code,
                        reason: close.reason.unwrap_or_default().into(),
                    });
                    let _ = public_sink.send(AxumMessage::Close(frame)).await;
                    break;
                }
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => break,
            }
        }
    };

    tokio::select! {
        _ = to_client => {}
        _ = from_client => {}
        _ = async {
            while let Some(event) = peer_rx.recv().await {
                if let PeerEvent::Close { .. } = event {
                    break;
                }
            }
        } => {}
    }

    session.proxied_websockets.write().await.remove(&local_id);
}
