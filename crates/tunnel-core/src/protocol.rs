// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tunnel protocol (C3): typed frames carried on top of the C2 substream
//! contract.
//!
//! Each substream is a byte stream (see [`crate::mux`]); this module adds
//! the length-prefixed framing and one-byte type tag that turn it into a
//! sequence of typed messages, plus the JSON payload schemas for
//! `PROXY_INIT`/`PROXY_WEBSOCKET_CLOSE`.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Ordered, single-valued request/response headers (everything except
/// `Set-Cookie`, which travels separately — see [`ProxyInitResponse`]).
pub type Headers = IndexMap<String, String>;

// -- Frame tags --------------------------------------------------------------

pub const TAG_PROXY_INIT: u8 = 0x01;
/// Edge→client body chunk tag (`PROXY_BODY` in spec terms).
pub const TAG_PROXY_BODY: u8 = 0x02;
/// Client→edge body chunk tag (`PROXY_DATA` in spec terms). Distinct from
/// [`TAG_PROXY_BODY`] only in name, not wire value, since direction already
/// disambiguates which schema applies.
pub const TAG_PROXY_DATA: u8 = 0x02;
pub const TAG_PROXY_WEBSOCKET_MESSAGE: u8 = 0x03;
pub const TAG_PROXY_WEBSOCKET_CLOSE: u8 = 0x04;

/// Discriminator byte prefixed to a `PROXY_WEBSOCKET_MESSAGE` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsFrameKind {
    Text,
    Binary,
}

impl WsFrameKind {
    fn tag(self) -> u8 {
        match self {
            WsFrameKind::Text => 0x00,
            WsFrameKind::Binary => 0x01,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x00 => Some(WsFrameKind::Text),
            0x01 => Some(WsFrameKind::Binary),
            _ => None,
        }
    }
}

// -- JSON payload schemas -----------------------------------------------------

/// Edge→client `PROXY_INIT` body: describes the inbound public request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyInitRequest {
    pub method: String,
    pub url: String,
    pub headers: Headers,
}

/// Client→edge `PROXY_INIT` reply: describes the local target's response.
///
/// `set_cookies` carries every `Set-Cookie` value from the local response in
/// order; `headers` never contains a `Set-Cookie` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyInitResponse {
    pub status_code: u16,
    pub status_message: String,
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub set_cookies: Vec<String>,
}

/// `PROXY_WEBSOCKET_CLOSE` body, sent by either side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebSocketClosePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `ConnectionEstablished`, the single JSON text message sent once per
/// control-socket lifetime before any binary multiplexer frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionEstablished {
    pub url: String,
    pub id: String,
}

/// First byte of the control socket's very first message identifies it as
/// the JSON handshake rather than a binary multiplexer frame (§6, §9).
pub const JSON_HANDSHAKE_PREFIX: u8 = b'{';

// -- Length-prefixed frame codec ---------------------------------------------

/// Maximum frame payload size accepted from the wire (16 MiB), guarding
/// against a peer claiming an unbounded length prefix.
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Write one length-prefixed frame: `u32 BE length` (tag + payload) followed
/// by the tag byte and payload.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    tag: u8,
    payload: &[u8],
) -> io::Result<()> {
    let mut buf = BytesMut::with_capacity(5 + payload.len());
    buf.put_u32(1 + payload.len() as u32);
    buf.put_u8(tag);
    buf.put_slice(payload);
    writer.write_all(&buf).await
}

/// Read one length-prefixed frame. Returns `Ok(None)` on a clean EOF between
/// frames (the peer closed the substream).
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> io::Result<Option<(u8, Bytes)>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(len_buf);
    if len == 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "zero-length frame header"));
    }
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame exceeds maximum length"));
    }
    let mut body = BytesMut::zeroed(len as usize);
    reader.read_exact(&mut body).await?;
    let tag = body[0];
    let payload = body.split_off(1).freeze();
    Ok(Some((tag, payload)))
}

/// Write a `PROXY_INIT` frame carrying a JSON-serializable payload.
pub async fn write_json_frame<W: AsyncWrite + Unpin, T: Serialize>(
    writer: &mut W,
    tag: u8,
    value: &T,
) -> io::Result<()> {
    let payload = serde_json::to_vec(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    write_frame(writer, tag, &payload).await
}

/// Decode a JSON payload previously written with [`write_json_frame`].
pub fn decode_json_frame<T: for<'de> Deserialize<'de>>(payload: &[u8]) -> io::Result<T> {
    serde_json::from_slice(payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Write a body chunk (`PROXY_BODY`/`PROXY_DATA`). An empty `chunk` is the
/// end-of-body terminator.
pub async fn write_body_chunk<W: AsyncWrite + Unpin>(
    writer: &mut W,
    tag: u8,
    chunk: &[u8],
) -> io::Result<()> {
    write_frame(writer, tag, chunk).await
}

/// Write a `PROXY_WEBSOCKET_MESSAGE` frame, preserving the text/binary flag.
pub async fn write_ws_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    kind: WsFrameKind,
    data: &[u8],
) -> io::Result<()> {
    let mut payload = BytesMut::with_capacity(1 + data.len());
    payload.put_u8(kind.tag());
    payload.put_slice(data);
    write_frame(writer, TAG_PROXY_WEBSOCKET_MESSAGE, &payload).await
}

/// Decode a `PROXY_WEBSOCKET_MESSAGE` payload into its discriminator and body.
pub fn decode_ws_message(mut payload: Bytes) -> io::Result<(WsFrameKind, Bytes)> {
    if payload.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "empty websocket message frame"));
    }
    let tag = payload.get_u8();
    let kind = WsFrameKind::from_tag(tag)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "unknown ws frame discriminator"))?;
    Ok((kind, payload))
}

/// Downgrade a close code to `None` unless it is 1000 or in `3000..=4999`,
/// the only ranges valid on most WebSocket APIs (§4.3).
pub fn sanitize_close_code(code: Option<u16>) -> Option<u16> {
    code.filter(|&c| c == 1000 || (3000..=4999).contains(&c))
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
