// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::HeaderMap;

use crate::error::TunnelError;

/// Header carrying the tunnel owner's client secret on the initial
/// `/api/tunnel/connect` request (§4.1). Combined with the edge's own
/// server secret, this deterministically derives the tunnel id — there is
/// no separate shared-secret table to check against.
pub const CLIENT_SECRET_HEADER: &str = "x-tunnel-secret";

/// Pull the client secret out of the connect request. A missing or empty
/// header is rejected before we ever attempt the WebSocket upgrade.
pub fn extract_client_secret(headers: &HeaderMap) -> Result<String, TunnelError> {
    let value = headers.get(CLIENT_SECRET_HEADER).ok_or(TunnelError::MissingSecret)?;
    let value = value.to_str().map_err(|_| TunnelError::MissingSecret)?;
    if value.is_empty() {
        return Err(TunnelError::MissingSecret);
    }
    Ok(value.to_string())
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
