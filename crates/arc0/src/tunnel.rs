// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervises the tunnel child process that exposes the Data transport port
//! to the paired client. Not restart-critical (§4.13): a dead or killed
//! child is logged and the daemon keeps running without one.

use std::sync::Arc;
use std::sync::Mutex;

use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::TunnelConfig;
use crate::transport::control::TunnelStopFn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Running,
    Exited,
    Stopped,
}

pub struct TunnelSupervisor {
    state: Mutex<TunnelState>,
    stop_tx: mpsc::UnboundedSender<()>,
}

impl TunnelSupervisor {
    /// Spawns the tunnel child (`frpc`) and starts watching it in the
    /// background. Returns `None` if the process could not be started at
    /// all; that's logged here and treated as "no tunnel", not a fatal
    /// startup error.
    pub fn spawn(config: TunnelConfig, data_port: u16, shutdown: CancellationToken) -> Option<Arc<Self>> {
        let mut command = Command::new("frpc");
        command.arg("--mode").arg(&config.mode).arg("--local-port").arg(data_port.to_string());
        if let Some(subdomain) = &config.subdomain {
            command.arg("--subdomain").arg(subdomain);
        }
        let supervisor = Self::spawn_command(command, shutdown);
        if supervisor.is_some() {
            info!(mode = %config.mode, data_port, "tunnel process started");
        }
        supervisor
    }

    fn spawn_command(mut command: Command, shutdown: CancellationToken) -> Option<Arc<Self>> {
        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(error = %e, "failed to start the tunnel process, continuing without one");
                return None;
            }
        };

        let (stop_tx, stop_rx) = mpsc::unbounded_channel();
        let supervisor = Arc::new(Self { state: Mutex::new(TunnelState::Running), stop_tx });

        let watched = Arc::clone(&supervisor);
        tokio::spawn(async move {
            watched.watch(child, stop_rx, shutdown).await;
        });

        Some(supervisor)
    }

    async fn watch(
        self: Arc<Self>,
        mut child: tokio::process::Child,
        mut stop_rx: mpsc::UnboundedReceiver<()>,
        shutdown: CancellationToken,
    ) {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = child.start_kill();
                self.set_state(TunnelState::Stopped);
            }
            _ = stop_rx.recv() => {
                let _ = child.start_kill();
                self.set_state(TunnelState::Stopped);
            }
            status = child.wait() => {
                match status {
                    Ok(status) => info!(%status, "tunnel process exited"),
                    Err(e) => warn!(error = %e, "error waiting on tunnel process"),
                }
                self.set_state(TunnelState::Exited);
            }
        }
    }

    fn set_state(&self, state: TunnelState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub fn status(&self) -> TunnelState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A sync callback suitable for `ControlState::tunnel_stop`: sends a stop
    /// signal to the watch task and reports whether it was delivered.
    pub fn stop_fn(self: &Arc<Self>) -> TunnelStopFn {
        let tx = self.stop_tx.clone();
        Arc::new(move || tx.send(()).is_ok())
    }
}

#[cfg(test)]
#[path = "tunnel_tests.rs"]
mod tests;
