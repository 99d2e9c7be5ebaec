// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Test code panics on a failed assumption by design; the workspace-wide
// unwrap/expect/panic lints are for production code paths.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

//! End-to-end scenario tests (§8): a real edge router, exercised over real
//! TCP, paired with a minimal in-test stand-in for the client runtime that
//! answers canned `PROXY_INIT` requests. This covers the contract between
//! the edge and the wire protocol without needing a full client process.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, Sink, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tunnel_core::mux::{mode_for, Multiplexer, Stream as MuxStream};
use tunnel_core::protocol::{
    self, ConnectionEstablished, Headers, ProxyInitRequest, ProxyInitResponse, WsFrameKind,
    TAG_PROXY_DATA, TAG_PROXY_INIT, TAG_PROXY_WEBSOCKET_MESSAGE,
};
use tunnel_edge::config::{EdgeConfig, RoutingMode};

const SERVER_SECRET: &str = "edge-test-secret";
const CLIENT_SECRET: &str = "client-test-secret";

/// Plain byte-stream adapter over a `tokio-tungstenite` socket, stripped of
/// the liveness bookkeeping `tunnel-client`'s real adapter carries — this is
/// test scaffolding standing in for that production type.
struct TestDuplex<S> {
    socket: S,
    read_buf: BytesMut,
}

impl<S> TestDuplex<S> {
    fn new(socket: S) -> Self {
        Self { socket, read_buf: BytesMut::new() }
    }
}

impl<S> AsyncRead for TestDuplex<S>
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        loop {
            if !self.read_buf.is_empty() {
                let n = self.read_buf.len().min(buf.remaining());
                buf.put_slice(&self.read_buf[..n]);
                let _ = self.read_buf.split_to(n);
                return Poll::Ready(Ok(()));
            }
            match Pin::new(&mut self.socket).poll_next(cx) {
                Poll::Ready(Some(Ok(Message::Binary(data)))) => self.read_buf.extend_from_slice(&data),
                Poll::Ready(Some(Ok(_))) => continue,
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(io::Error::other(e))),
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<S> AsyncWrite for TestDuplex<S>
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match Pin::new(&mut self.socket).poll_ready(cx) {
            Poll::Ready(Ok(())) => {}
            Poll::Ready(Err(e)) => return Poll::Ready(Err(io::Error::other(e))),
            Poll::Pending => return Poll::Pending,
        }
        match Pin::new(&mut self.socket).start_send(Message::Binary(buf.to_vec().into())) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(e) => Poll::Ready(Err(io::Error::other(e))),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.socket).poll_flush(cx).map_err(io::Error::other)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.socket).poll_close(cx).map_err(io::Error::other)
    }
}

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

/// Connects the fake client, completes the handshake, and serves inbound
/// substreams with canned responses until the connection drops.
async fn connect_fake_client(addr: std::net::SocketAddr) -> String {
    let url = format!("ws://{addr}/api/tunnel/connect");
    let mut request = url.into_client_request().unwrap();
    request.headers_mut().insert("x-tunnel-secret", CLIENT_SECRET.parse().unwrap());
    let (mut socket, _) = tokio_tungstenite::connect_async(request).await.unwrap();

    let established = match socket.next().await.unwrap().unwrap() {
        Message::Text(text) => serde_json::from_str::<ConnectionEstablished>(&text).unwrap(),
        other => panic!("expected handshake text frame, got {other:?}"),
    };

    let duplex = TestDuplex::new(socket);
    let multiplexer = Multiplexer::new(duplex, mode_for(false));
    let mut inbound = multiplexer.inbound;
    tokio::spawn(async move {
        while let Some(stream) = inbound.recv().await {
            tokio::spawn(serve_substream(stream));
        }
    });

    established.id
}

async fn serve_substream(mut stream: MuxStream) {
    let Ok(Some((tag, payload))) = protocol::read_frame(&mut stream).await else { return };
    assert_eq!(tag, TAG_PROXY_INIT);
    let request: ProxyInitRequest = protocol::decode_json_frame(&payload).unwrap();

    // Drain the request body/terminator.
    let mut body = Vec::new();
    loop {
        match protocol::read_frame(&mut stream).await {
            Ok(Some((tag, payload))) if tag == TAG_PROXY_DATA && !payload.is_empty() => body.extend_from_slice(&payload),
            Ok(Some((tag, _))) if tag == TAG_PROXY_DATA => break,
            _ => break,
        }
    }

    let path = request.url.split('?').next().unwrap_or("/");
    match path {
        "/simple" => {
            reply_text(&mut stream, 200, "OK", "hello from tunnel client").await;
        }
        "/echo" => {
            let mut headers = Headers::new();
            headers.insert("content-type".to_string(), "application/json".to_string());
            reply(&mut stream, 200, "OK", headers, vec![], body).await;
        }
        "/cookies" => {
            reply(
                &mut stream,
                200,
                "OK",
                Headers::new(),
                vec!["a=1; Path=/".to_string(), "b=2; Path=/".to_string()],
                b"ok".to_vec(),
            )
            .await;
        }
        "/ws-echo" => {
            let reply = ProxyInitResponse {
                status_code: 101,
                status_message: "Switching Protocols".to_string(),
                headers: Headers::new(),
                set_cookies: vec![],
            };
            protocol::write_json_frame(&mut stream, TAG_PROXY_INIT, &reply).await.unwrap();
            loop {
                match protocol::read_frame(&mut stream).await {
                    Ok(Some((tag, payload))) if tag == TAG_PROXY_WEBSOCKET_MESSAGE => {
                        let (kind, data) = protocol::decode_ws_message(payload).unwrap();
                        protocol::write_ws_message(&mut stream, kind, &data).await.unwrap();
                    }
                    _ => break,
                }
            }
        }
        other => panic!("unexpected proxied path in test: {other}"),
    }
}

async fn reply_text(stream: &mut MuxStream, status: u16, message: &str, body: &str) {
    reply(stream, status, message, Headers::new(), vec![], body.as_bytes().to_vec()).await;
}

async fn reply(
    stream: &mut MuxStream,
    status_code: u16,
    status_message: &str,
    headers: Headers,
    set_cookies: Vec<String>,
    body: Vec<u8>,
) {
    let reply = ProxyInitResponse { status_code, status_message: status_message.to_string(), headers, set_cookies };
    protocol::write_json_frame(stream, TAG_PROXY_INIT, &reply).await.unwrap();
    protocol::write_body_chunk(stream, tunnel_core::protocol::TAG_PROXY_BODY, &body).await.unwrap();
    protocol::write_body_chunk(stream, tunnel_core::protocol::TAG_PROXY_BODY, &[]).await.unwrap();
}

#[tokio::test]
async fn health_check_returns_ok() {
    let addr = spawn_edge().await;
    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn unknown_tunnel_id_returns_404() {
    let addr = spawn_edge().await;
    let resp = reqwest::get(format!("http://{addr}/tunnel/0000000000000000/simple")).await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn no_client_connected_returns_503() {
    let addr = spawn_edge().await;
    // A syntactically valid id that has never had a control socket attach.
    let id = tunnel_core::identity::derive(b"never-connects", SERVER_SECRET.as_bytes());
    let resp = reqwest::get(format!("http://{addr}/tunnel/{id}/simple")).await.unwrap();
    assert_eq!(resp.status(), 503);
}

#[tokio::test]
async fn simple_get_round_trip() {
    let addr = spawn_edge().await;
    let id = connect_fake_client(addr).await;
    let resp = reqwest::get(format!("http://{addr}/tunnel/{id}/simple")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "hello from tunnel client");
}

#[tokio::test]
async fn post_body_is_forwarded_and_echoed() {
    let addr = spawn_edge().await;
    let id = connect_fake_client(addr).await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{addr}/tunnel/{id}/echo"))
        .body(r#"{"hello":"world"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("content-type").unwrap(), "application/json");
    assert_eq!(resp.text().await.unwrap(), r#"{"hello":"world"}"#);
}

#[tokio::test]
async fn multiple_set_cookie_headers_are_preserved_in_order() {
    let addr = spawn_edge().await;
    let id = connect_fake_client(addr).await;
    let resp = reqwest::get(format!("http://{addr}/tunnel/{id}/cookies")).await.unwrap();
    let cookies: Vec<_> = resp.headers().get_all("set-cookie").iter().map(|v| v.to_str().unwrap().to_string()).collect();
    assert_eq!(cookies, vec!["a=1; Path=/".to_string(), "b=2; Path=/".to_string()]);
}

#[tokio::test]
async fn websocket_messages_are_bridged_and_echoed() {
    let addr = spawn_edge().await;
    let id = connect_fake_client(addr).await;

    let url = format!("ws://{addr}/tunnel/{id}/ws-echo");
    let (mut socket, response) = tokio_tungstenite::connect_async(url).await.unwrap();
    assert_eq!(response.status(), 101);

    socket.send(Message::Text("ping".into())).await.unwrap();
    let reply = socket.next().await.unwrap().unwrap();
    assert_eq!(reply, Message::Text("ping".into()));
}
