// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapts the binary half of an accepted control `WebSocket` into a plain
//! `AsyncRead + AsyncWrite` duplex so [`tunnel_core::mux::Multiplexer`] can
//! drive a yamux connection over it (Design Notes §9: "a dedicated
//! handshake phase ... before switching to binary framing").

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use bytes::{Bytes, BytesMut};
use futures_util::{Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Shared slot used to ask a live [`WsDuplex`] to emit a specific WebSocket
/// close code/reason the next time its transport is shut down, instead of
/// whatever default close frame the underlying socket would otherwise send.
/// Used by control-socket eviction (§4.2) to close the replaced connection
/// with code 1000 and an explanatory reason.
pub type WsCloseHandle = Arc<Mutex<Option<(u16, String)>>>;

enum ShutdownState {
    Idle,
    Closing,
}

pub struct WsDuplex {
    socket: WebSocket,
    read_buf: BytesMut,
    closer: WsCloseHandle,
    shutdown_state: ShutdownState,
}

impl WsDuplex {
    /// Wrap `socket` for binary multiplexer framing. Callers must already
    /// have sent the `ConnectionEstablished` JSON text frame before this
    /// point — every message from here on is treated as a binary chunk.
    pub fn new(socket: WebSocket) -> (Self, WsCloseHandle) {
        let closer: WsCloseHandle = Arc::new(Mutex::new(None));
        let duplex = Self {
            socket,
            read_buf: BytesMut::new(),
            closer: Arc::clone(&closer),
            shutdown_state: ShutdownState::Idle,
        };
        (duplex, closer)
    }
}

impl AsyncRead for WsDuplex {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if !self.read_buf.is_empty() {
                let n = self.read_buf.len().min(buf.remaining());
                buf.put_slice(&self.read_buf[..n]);
                let _ = self.read_buf.split_to(n);
                return Poll::Ready(Ok(()));
            }

            let socket = Pin::new(&mut self.socket);
            match socket.poll_next(cx) {
                Poll::Ready(Some(Ok(Message::Binary(data)))) => {
                    self.read_buf.extend_from_slice(&data);
                }
                Poll::Ready(Some(Ok(Message::Text(_) | Message::Ping(_) | Message::Pong(_)))) => {
                    // Not part of the binary multiplexer stream; keep waiting.
                    continue;
                }
                Poll::Ready(Some(Ok(Message::Close(_)))) | Poll::Ready(None) => {
                    return Poll::Ready(Ok(())); // EOF
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Err(io::Error::other(e)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl AsyncWrite for WsDuplex {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let socket = Pin::new(&mut self.socket);
        match socket.poll_ready(cx) {
            Poll::Ready(Ok(())) => {}
            Poll::Ready(Err(e)) => return Poll::Ready(Err(io::Error::other(e))),
            Poll::Pending => return Poll::Pending,
        }
        let chunk = Bytes::copy_from_slice(buf);
        match Pin::new(&mut self.socket).start_send(Message::Binary(chunk)) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(e) => Poll::Ready(Err(io::Error::other(e))),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.socket).poll_flush(cx).map_err(io::Error::other)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        loop {
            match self.shutdown_state {
                ShutdownState::Idle => {
                    let reason = self.closer.lock().unwrap_or_else(|e| e.into_inner()).clone();
                    if let Some((code, reason)) = reason {
                        match Pin::new(&mut self.socket).poll_ready(cx) {
                            Poll::Ready(Ok(())) => {
                                self.closer.lock().unwrap_or_else(|e| e.into_inner()).take();
                                let frame = CloseFrame { code, reason: reason.into() };
                                let _ = Pin::new(&mut self.socket).start_send(Message::Close(Some(frame)));
                            }
                            Poll::Ready(Err(e)) => return Poll::Ready(Err(io::Error::other(e))),
                            Poll::Pending => return Poll::Pending,
                        }
                    }
                    self.shutdown_state = ShutdownState::Closing;
                }
                ShutdownState::Closing => {
                    return Pin::new(&mut self.socket).poll_close(cx).map_err(io::Error::other);
                }
            }
        }
    }
}
