// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapts the binary half of the outbound control `WebSocket` into an
//! `AsyncRead + AsyncWrite` duplex for [`tunnel_core::mux::Multiplexer`],
//! folding in liveness ping/pong (§6) since nothing else holds the socket
//! once it is handed to the multiplexer.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use futures_util::{Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::MaybeTlsStream;
use tokio::net::TcpStream;

pub type ControlSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsDuplex {
    socket: ControlSocket,
    read_buf: BytesMut,
    ping_interval: Duration,
    pong_timeout: Duration,
    next_ping_at: Instant,
    last_pong_at: Instant,
}

impl WsDuplex {
    pub fn new(socket: ControlSocket, ping_interval: Duration, pong_timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            socket,
            read_buf: BytesMut::new(),
            ping_interval,
            pong_timeout,
            next_ping_at: now + ping_interval,
            last_pong_at: now,
        }
    }

    fn maintain_liveness(&mut self, cx: &mut Context<'_>) -> io::Result<bool> {
        let now = Instant::now();
        if now.duration_since(self.last_pong_at) > self.pong_timeout {
            return Ok(true); // signal EOF: caller should reconnect
        }
        if now >= self.next_ping_at {
            self.next_ping_at = now + self.ping_interval;
            if let Poll::Ready(Ok(())) = Pin::new(&mut self.socket).poll_ready(cx) {
                let _ = Pin::new(&mut self.socket).start_send(Message::Ping(Vec::new().into()));
            }
        }
        Ok(false)
    }
}

impl AsyncRead for WsDuplex {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        loop {
            if !self.read_buf.is_empty() {
                let n = self.read_buf.len().min(buf.remaining());
                buf.put_slice(&self.read_buf[..n]);
                let _ = self.read_buf.split_to(n);
                return Poll::Ready(Ok(()));
            }

            match self.maintain_liveness(cx) {
                Ok(true) => return Poll::Ready(Ok(())), // EOF
                Ok(false) => {}
                Err(e) => return Poll::Ready(Err(e)),
            }

            match Pin::new(&mut self.socket).poll_next(cx) {
                Poll::Ready(Some(Ok(Message::Binary(data)))) => {
                    self.read_buf.extend_from_slice(&data);
                }
                Poll::Ready(Some(Ok(Message::Pong(_)))) => {
                    self.last_pong_at = Instant::now();
                }
                Poll::Ready(Some(Ok(Message::Text(_) | Message::Ping(_) | Message::Frame(_)))) => {
                    continue;
                }
                Poll::Ready(Some(Ok(Message::Close(_)))) | Poll::Ready(None) => {
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Err(io::Error::other(e))),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl AsyncWrite for WsDuplex {
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
