// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error kinds for the edge's public HTTP surface (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TunnelError {
    MissingSecret,
    NotWebSocket,
    UnknownId,
    NoClientConnected,
    UpstreamTransportFailure,
}

impl TunnelError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::MissingSecret => 401,
            Self::NotWebSocket => 426,
            Self::UnknownId => 404,
            Self::NoClientConnected => 503,
            Self::UpstreamTransportFailure => 502,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingSecret => "MISSING_SECRET",
            Self::NotWebSocket => "NOT_WEBSOCKET",
            Self::UnknownId => "UNKNOWN_ID",
            Self::NoClientConnected => "NO_CLIENT_CONNECTED",
            Self::UpstreamTransportFailure => "UPSTREAM_TRANSPORT_FAILURE",
        }
    }

    pub fn to_json_response(&self, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorResponse { error: message.into() }))
    }
}

impl fmt::Display for TunnelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{"error": "..."}` envelope matching spec.md's literal 503/401/426/404
/// bodies (e.g. `{"error":"No client connected"}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
