// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `arc0d` binary as a subprocess and exercises it over the
//! Control (HTTP) and Data (WebSocket) transports.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use serde::Deserialize;

/// Resolve the path to the compiled `arc0d` binary.
pub fn arc0_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("arc0d")
}

/// `daemon.state.json` as the daemon actually writes it, including the
/// `socketPort`-for-`dataPort` naming quirk.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonState {
    pub version: u32,
    pub pid: u32,
    pub control_port: u16,
    #[serde(rename = "socketPort")]
    pub data_port: u16,
    pub started_at: String,
}

/// A running `arc0d` process that is killed on drop.
pub struct Arc0Process {
    child: Child,
    base_dir: PathBuf,
    _owned_dir: Option<tempfile::TempDir>,
}

/// Builder for configuring one `arc0d` invocation.
#[derive(Default)]
pub struct Arc0Builder {
    base_dir: Option<PathBuf>,
    control_port: Option<u16>,
    data_port: Option<u16>,
}

impl Arc0Builder {
    /// Use a caller-chosen base dir instead of a fresh temp dir. Needed to
    /// exercise single-instance-lock exclusivity across two processes.
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn control_port(mut self, port: u16) -> Self {
        self.control_port = Some(port);
        self
    }

    pub fn data_port(mut self, port: u16) -> Self {
        self.data_port = Some(port);
        self
    }

    pub fn spawn(self) -> anyhow::Result<Arc0Process> {
        let binary = arc0_binary();
        anyhow::ensure!(binary.exists(), "arc0d binary not found at {}", binary.display());

        let (base_dir, owned_dir) = match self.base_dir {
            Some(dir) => (dir, None),
            None => {
                let dir = tempfile::tempdir()?;
                (dir.path().to_path_buf(), Some(dir))
            }
        };

        let mut command = Command::new(&binary);
        command.arg("--base-dir").arg(&base_dir);
        command.arg("--log-format").arg("text");
        command.arg("--log-level").arg("warn");
        if let Some(port) = self.control_port {
            command.arg("--control-port").arg(port.to_string());
        }
        if let Some(port) = self.data_port {
            command.arg("--data-port").arg(port.to_string());
        }
        command.stdout(Stdio::null()).stderr(Stdio::null());

        let child = command.spawn()?;
        Ok(Arc0Process { child, base_dir, _owned_dir: owned_dir })
    }
}

impl Arc0Process {
    /// Create a builder for a custom invocation.
    pub fn build() -> Arc0Builder {
        Arc0Builder::default()
    }

    /// Spawn `arc0d` with a fresh, isolated base dir.
    pub fn start() -> anyhow::Result<Self> {
        Self::build().spawn()
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn state_path(&self) -> PathBuf {
        self.base_dir.join("daemon.state.json")
    }

    /// Poll `daemon.state.json` until it appears and parses, meaning both
    /// listeners are bound and the daemon is ready to serve requests.
    pub async fn wait_state(&self, timeout: Duration) -> anyhow::Result<DaemonState> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("arc0d did not write daemon.state.json within {timeout:?}");
            }
            if let Ok(bytes) = std::fs::read(self.state_path()) {
                if let Ok(state) = serde_json::from_slice::<DaemonState>(&bytes) {
                    return Ok(state);
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Wait for the process to exit within `timeout`.
    pub async fn wait_exit(&mut self, timeout: Duration) -> anyhow::Result<std::process::ExitStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("arc0d did not exit within {timeout:?}");
            }
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for Arc0Process {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn control_url(port: u16, path: &str) -> String {
    format!("http://127.0.0.1:{port}{path}")
}

/// `auth_token` is expected already base64url-encoded (no padding), which
/// never contains characters that need percent-escaping in a query string.
pub fn data_ws_url(port: u16, device_id: &str, auth_token: &str) -> String {
    format!("ws://127.0.0.1:{port}/?deviceId={device_id}&authToken={auth_token}")
}

pub fn data_ws_url_unauthenticated(port: u16) -> String {
    format!("ws://127.0.0.1:{port}/")
}
