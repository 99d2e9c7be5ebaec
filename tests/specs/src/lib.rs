// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenario tests for the edge/client pair (§8). Exercised
//! entirely through `tests/integration.rs`; this crate has no public API of
//! its own beyond the subprocess harness below.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

/// Resolve the path to the compiled `tunnel-client` binary.
pub fn tunnel_client_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs -> tests -> workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("tunnel-client")
}

/// A running `tunnel-client` process, killed on drop.
pub struct TunnelClientProcess {
    child: Child,
}

impl TunnelClientProcess {
    /// Spawn the real `tunnel-client` binary against `server_url` (the
    /// edge's control endpoint) and `local_target` (the proxied backend).
    pub fn spawn(server_url: &str, client_secret: &str, local_target: &str) -> anyhow::Result<Self> {
        let binary = tunnel_client_binary();
        anyhow::ensure!(binary.exists(), "tunnel-client binary not found at {}", binary.display());

        let child = Command::new(&binary)
            .env("TUNNEL_CLIENT_SERVER_URL", server_url)
            .env("TUNNEL_CLIENT_SECRET", client_secret)
            .env("TUNNEL_CLIENT_LOCAL_TARGET", local_target)
            .env("RUST_LOG", "warn")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(Self { child })
    }

    /// Wait for the process to exit within `timeout`.
    pub async fn wait_exit(&mut self, timeout: Duration) -> anyhow::Result<std::process::ExitStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("tunnel-client did not exit within {timeout:?}");
            }
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for TunnelClientProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
