// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C2 multiplexer contract: a thin adapter over the `yamux` crate.
//!
//! spec.md treats the embedded multiplexer as an external dependency and
//! only specifies the behavioral contract it must satisfy: stream-oriented,
//! bidirectional, ordered delivery within a stream, independent flow across
//! streams, and a `create`/`accept`/`close` surface with a monotonically
//! increasing stream id. `yamux::Connection` satisfies all of that directly;
//! this module just gives the rest of the workspace a stable, narrow
//! surface instead of depending on `yamux` types throughout.
//!
//! One detail from spec §9 falls out for free: yamux already partitions the
//! stream-id space by parity between the side that dialed (odd ids) and the
//! side that listened (even ids), which is exactly the collision-avoidance
//! scheme the spec suggests for `nextStreamId` recovery across edge
//! restarts.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::compat::{Compat, FuturesAsyncReadCompatExt, TokioAsyncReadCompatExt};

pub use yamux::{Config, ConnectionError, Mode};

/// A tunnel substream. `yamux` speaks the `futures-io` traits internally;
/// this is that same stream wrapped in [`tokio_util::compat`] so the rest of
/// the workspace can treat it as an ordinary `tokio::io::{AsyncRead,
/// AsyncWrite}`, matching every other transport in this crate.
pub type Stream = Compat<yamux::Stream>;

/// Handle used to open new outbound substreams.
#[derive(Clone)]
pub struct Control(yamux::Control);

impl Control {
    /// Open a new outbound substream.
    pub async fn open_stream(&mut self) -> Result<Stream, ConnectionError> {
        self.0.open_stream().await.map(FuturesAsyncReadCompatExt::compat)
    }

    /// Close the underlying connection, ending every substream on it.
    pub async fn close(&mut self) -> Result<(), ConnectionError> {
        self.0.close().await
    }
}

/// Which side of the control socket this multiplexer instance runs on.
/// The edge, which accepts the inbound control WebSocket, is the listener
/// (`Mode::Server`); the client, which dials out, is the dialer
/// (`Mode::Client`).
pub fn mode_for(is_edge: bool) -> Mode {
    if is_edge {
        Mode::Server
    } else {
        Mode::Client
    }
}

/// A running multiplexer over one control-socket transport.
///
/// Construction spawns the background task that drives the underlying
/// `yamux::Connection` (accepting inbound streams and servicing the
/// [`Control`] handle's outbound opens); callers interact only through
/// [`Control`] and the `inbound` receiver.
pub struct Multiplexer {
    pub control: Control,
    /// Yields substreams the peer opened, in the order they were accepted.
    pub inbound: mpsc::Receiver<Stream>,
}

impl Multiplexer {
    /// Wrap `io` (an established duplex transport, e.g. the binary half of
    /// the control WebSocket) in a yamux connection and start driving it.
    pub fn new<T>(io: T, mode: Mode) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let conn = yamux::Connection::new(io.compat(), Config::default(), mode);
        let control = Control(conn.control());
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(drive(conn, tx));
        Self { control, inbound: rx }
    }
}

/// Continuously accept inbound substreams until the connection closes or
/// errors; each accepted stream is forwarded to `tx`.
async fn drive(
    mut conn: yamux::Connection<impl futures_util::io::AsyncRead + futures_util::io::AsyncWrite + Unpin>,
    tx: mpsc::Sender<Stream>,
) {
    loop {
        match futures_util::future::poll_fn(|cx| conn.poll_next_inbound(cx)).await {
            Some(Ok(stream)) => {
                if tx.send(stream.compat()).await.is_err() {
                    return;
                }
            }
            Some(Err(e)) => {
                tracing::debug!(err = %e, "multiplexer connection error, stopping");
                return;
            }
            None => return,
        }
    }
}
