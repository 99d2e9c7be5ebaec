// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tunnel_core::mux::Control;
use tunnel_core::TunnelId;

use crate::config::EdgeConfig;
use crate::transport::ws_io::WsCloseHandle;

/// Shared edge state: one [`Session`] per tunnel id ever seen on this node.
pub struct EdgeState {
    pub config: EdgeConfig,
    pub sessions: RwLock<HashMap<TunnelId, Arc<Session>>>,
}

impl EdgeState {
    pub fn new(config: EdgeConfig) -> Self {
        Self { config, sessions: RwLock::new(HashMap::new()) }
    }

    /// Get or create the session for `id`. Session objects are created
    /// lazily and live until the process forgets them (restart-dependent,
    /// §3) — all state rebuilds from the next control-socket connect.
    pub async fn session(&self, id: &TunnelId) -> Arc<Session> {
        if let Some(existing) = self.sessions.read().await.get(id) {
            return Arc::clone(existing);
        }
        let mut sessions = self.sessions.write().await;
        sessions.entry(id.clone()).or_insert_with(|| Arc::new(Session::new(id.clone()))).clone()
    }

    /// Look up a session without creating one; used by the front door, which
    /// must 503 rather than conjure a session for an id that never connected.
    pub async fn existing_session(&self, id: &TunnelId) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }
}

/// Sent to a bridged peer WebSocket's task to interrupt it outside the
/// substream itself — currently only used to force-close every bridge when
/// the tunnel's control connection is lost (§4.2).
#[derive(Debug)]
pub enum PeerEvent {
    Close { code: Option<u16>, reason: Option<String> },
}

/// One per tunnel id that has ever connected on this edge node (§3).
pub struct Session {
    pub id: TunnelId,
    control: RwLock<Option<Arc<ControlHandle>>>,
    pub proxied_websockets: RwLock<HashMap<u32, mpsc::UnboundedSender<PeerEvent>>>,
    next_local_stream_id: AtomicU64,
}

/// A live control connection: the yamux [`Control`] handle used to open new
/// substreams, a handle to request a specific close code/reason on the
/// underlying WebSocket, and the generation counter used to detect eviction
/// races.
pub struct ControlHandle {
    pub control: Control,
    pub closer: WsCloseHandle,
    pub generation: u64,
}

impl Session {
    fn new(id: TunnelId) -> Self {
        Self {
            id,
            control: RwLock::new(None),
            proxied_websockets: RwLock::new(HashMap::new()),
            next_local_stream_id: AtomicU64::new(0),
        }
    }

    /// Local bookkeeping id for a newly bridged peer WebSocket, distinct
    /// from the yamux substream id, used only as the key into
    /// `proxied_websockets`.
    pub fn next_local_stream_id(&self) -> u32 {
        self.next_local_stream_id.fetch_add(1, Ordering::Relaxed) as u32
    }

    /// Install a new control connection, evicting any previous one. Returns
    /// the new handle's generation plus the evicted handle, if any, so the
    /// caller can close the evicted transport with code 1000 outside the
    /// lock.
    pub async fn accept_control(
        &self,
        control: Control,
        closer: WsCloseHandle,
    ) -> (u64, Option<Arc<ControlHandle>>) {
        let mut guard = self.control.write().await;
        let generation = guard.as_ref().map(|h| h.generation + 1).unwrap_or(0);
        let evicted = guard.replace(Arc::new(ControlHandle { control, closer, generation }));
        (generation, evicted)
    }

    /// Current control handle, if the session has a live control socket.
    pub async fn control(&self) -> Option<Arc<ControlHandle>> {
        self.control.read().await.clone()
    }

    /// Drop the control handle if it still matches `generation` (guards
    /// against a stale disconnect callback clearing a newer connection).
    /// Also closes and clears every bridged peer WebSocket (§4.2).
    pub async fn clear_control_if_current(&self, generation: u64) {
        {
            let mut guard = self.control.write().await;
            if matches!(guard.as_ref(), Some(h) if h.generation == generation) {
                *guard = None;
            }
        }
        let mut peers = self.proxied_websockets.write().await;
        for (_, tx) in peers.drain() {
            let _ = tx.send(PeerEvent::Close { code: Some(1001), reason: Some("tunnel disconnected".into()) });
        }
    }
}
