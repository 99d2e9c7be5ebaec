// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod auth;
pub mod control;
pub mod front_door;
pub mod ws_io;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::EdgeState;

/// Build the edge's public router: the fixed control-socket and health
/// routes, plus a catch-all front door for every other request (§4.4).
///
/// Tunneled responses carry arbitrary cross-origin content the operator's
/// own local server controls, not this edge, so CORS is left permissive
/// rather than second-guessed here.
pub fn build_router(state: Arc<EdgeState>) -> Router {
    Router::new()
        .route("/health", get(control::health))
        .route("/api/tunnel/connect", get(control::connect))
        .fallback(front_door::proxy)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
