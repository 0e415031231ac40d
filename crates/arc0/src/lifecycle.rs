// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon startup and shutdown sequencing: single-instance lock, watcher
//! bring-up, listener binding with port-preference fallback, and graceful
//! teardown. See §4.12, §5.

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use fs2::FileExt;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bus::{BusEvent, EventBus};
use crate::clock::unix_timestamp;
use crate::config::{Config, PersistedConfig};
use crate::dispatch::Dispatcher;
use crate::events::PermissionWatcher;
use crate::pairing::PairingCoordinator;
use crate::pane::{PaneAdapter, TmuxPaneAdapter};
use crate::registry::client::ClientRegistry;
use crate::registry::session::SessionRegistry;
use crate::transcript::TranscriptWatcher;
use crate::transport::control::{self, ControlState};
use crate::transport::data::{self, ConnectionTracker, DataState};
use crate::tunnel::TunnelSupervisor;

const LOCK_FILE: &str = "daemon.lock";
const STATE_FILE: &str = "daemon.state.json";
const CREDENTIALS_FILE: &str = ".credentials.json";
const STATE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("another arc0d is already running (pid {0})")]
    LockHeld(u32),
    #[error("failed to bind the {0} listener: {1}")]
    BindFailed(&'static str, std::io::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn lock_path(base_dir: &Path) -> PathBuf {
    base_dir.join(LOCK_FILE)
}

fn state_path(base_dir: &Path) -> PathBuf {
    base_dir.join(STATE_FILE)
}

fn credentials_path(base_dir: &Path) -> PathBuf {
    base_dir.join(CREDENTIALS_FILE)
}

/// Holds the OS-level exclusive lock for the process's lifetime. The lock is
/// released when this is dropped, whether by an explicit [`Daemon::shutdown`]
/// or by the process exiting unexpectedly.
#[derive(Debug)]
struct InstanceLock {
    _file: File,
}

fn read_lock_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn pid_is_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Acquire the single-instance lock at `<base_dir>/daemon.lock`. If another
/// process holds it, the lock is stolen only when that process's pid is no
/// longer alive; otherwise this fails with [`LifecycleError::LockHeld`].
fn acquire_lock(base_dir: &Path) -> Result<InstanceLock, LifecycleError> {
    std::fs::create_dir_all(base_dir)?;
    let path = lock_path(base_dir);
    let file = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(&path)?;

    if file.try_lock_exclusive().is_err() {
        let holder = read_lock_pid(&path);
        match holder {
            Some(pid) if pid_is_alive(pid) => return Err(LifecycleError::LockHeld(pid)),
            Some(pid) => {
                warn!(pid, "stale lock file, previous owner is gone, stealing it");
                file.try_lock_exclusive().map_err(|_| LifecycleError::LockHeld(pid))?;
            }
            None => return Err(LifecycleError::LockHeld(0)),
        }
    }

    let mut file = file;
    file.set_len(0)?;
    writeln!(file, "{}", std::process::id())?;
    Ok(InstanceLock { _file: file })
}

/// `.credentials.json`: per-daemon secrets, generated once on first run and
/// reused across restarts (§6, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DaemonSecrets {
    secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    encryption_key: Option<String>,
    created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    bearer_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
}

fn ensure_secrets(base_dir: &Path) -> anyhow::Result<DaemonSecrets> {
    let path = credentials_path(base_dir);
    if let Some(existing) = crate::persist::load::<DaemonSecrets>(&path)? {
        return Ok(existing);
    }
    let fresh = DaemonSecrets {
        secret: uuid::Uuid::new_v4().to_string(),
        encryption_key: None,
        created_at: unix_timestamp(),
        bearer_token: None,
        user_id: None,
    };
    crate::persist::save_with_mode(&path, &fresh, Some(0o600))?;
    Ok(fresh)
}

/// `daemon.state.json`. Note `dataPort` is persisted under the literal key
/// `socketPort`, a naming quirk inherited by every reader of this file (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DaemonState {
    version: u32,
    pid: u32,
    control_port: u16,
    #[serde(rename = "socketPort")]
    data_port: u16,
    started_at: String,
}

fn write_state_file(base_dir: &Path, control_port: u16, data_port: u16) -> anyhow::Result<()> {
    let state = DaemonState {
        version: STATE_VERSION,
        pid: std::process::id(),
        control_port,
        data_port,
        started_at: unix_timestamp(),
    };
    crate::persist::save(&state_path(base_dir), &state)
}

/// Bind `preferred` if given and free; otherwise (or on `EADDRINUSE`) fall
/// back to an OS-assigned port.
async fn bind_preferred(preferred: Option<u16>, label: &'static str) -> Result<TcpListener, LifecycleError> {
    if let Some(port) = preferred {
        match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                warn!(port, label, "preferred port in use, falling back to an OS-assigned one");
            }
            Err(e) => return Err(LifecycleError::BindFailed(label, e)),
        }
    }
    TcpListener::bind(("127.0.0.1", 0)).await.map_err(|e| LifecycleError::BindFailed(label, e))
}

/// Bridges session discovery to the file watchers that only matter once a
/// session exists: the transcript tail and the permission-event tail both
/// need an explicit `watch_session` call, which nothing else in the crate
/// issues today.
fn spawn_watcher_bridge(
    bus: EventBus,
    transcripts: TranscriptWatcher,
    permissions: PermissionWatcher,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut rx = bus.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                event = rx.recv() => {
                    let Ok(event) = event else { continue };
                    match event {
                        BusEvent::SessionStart(session) => {
                            transcripts.watch_session(session.session_id.clone(), session.transcript_path.clone());
                            permissions.watch_session(session.session_id.clone());
                        }
                        BusEvent::SessionEnd { session_id } => {
                            transcripts.unwatch_session(&session_id);
                            permissions.unwatch_session(&session_id);
                        }
                        _ => {}
                    }
                }
            }
        }
    });
}

/// Spawns the SIGTERM/SIGINT handler: the first signal cancels `shutdown`,
/// the second forces an immediate exit.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async { if let Some(s) = sigterm.as_mut() { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGTERM");
            }
            _ = async { if let Some(s) = sigint.as_mut() { s.recv().await } else { std::future::pending().await } } => {
                info!("received SIGINT");
            }
        }
        shutdown.cancel();

        tokio::select! {
            _ = async { if let Some(s) = sigterm.as_mut() { s.recv().await } else { std::future::pending().await } } => {
                warn!("received a second signal, forcing exit");
            }
            _ = async { if let Some(s) = sigint.as_mut() { s.recv().await } else { std::future::pending().await } } => {
                warn!("received a second signal, forcing exit");
            }
        }
        std::process::exit(130);
    });
}

/// A fully started daemon: listeners bound, watchers running, lock held.
pub struct Daemon {
    pub base_dir: PathBuf,
    pub control_port: u16,
    pub data_port: u16,
    shutdown: CancellationToken,
    _lock: InstanceLock,
}

impl Daemon {
    /// Resolves once a shutdown signal has been received (or `shutdown()` was
    /// called from elsewhere in-process, e.g. a test harness).
    pub async fn wait(&self) {
        self.shutdown.cancelled().await;
    }

    /// Runs the shutdown sequence: cancel every background task, give the
    /// listeners a moment to finish their graceful drain, then remove the
    /// state file. The lock itself releases when `self` drops.
    pub async fn shutdown(self) {
        info!("shutting down");
        self.shutdown.cancel();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        match std::fs::remove_file(state_path(&self.base_dir)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "failed to remove daemon.state.json"),
        }
        info!("shutdown complete");
    }
}

/// Runs the full startup sequence described in §4.12 and returns a running
/// [`Daemon`]. On `LifecycleError::LockHeld`, the existing daemon's ports are
/// printed to stderr before the error is returned, matching the "print
/// existing daemon's ports and exit non-zero" requirement.
pub async fn start(config: Config) -> anyhow::Result<Daemon> {
    let base_dir = config.resolve_base_dir()?;
    std::fs::create_dir_all(&base_dir)?;

    let mut persisted = PersistedConfig::load_or_init(&base_dir)?;
    ensure_secrets(&base_dir)?;

    let lock = match acquire_lock(&base_dir) {
        Ok(lock) => lock,
        Err(LifecycleError::LockHeld(pid)) => {
            match crate::persist::load::<DaemonState>(&state_path(&base_dir)) {
                Ok(Some(state)) => eprintln!(
                    "arc0d is already running (pid {pid}): control port {}, data port {}",
                    state.control_port, state.data_port
                ),
                _ => eprintln!("arc0d is already running (pid {pid})"),
            }
            return Err(LifecycleError::LockHeld(pid).into());
        }
        Err(e) => return Err(e.into()),
    };
    info!(base_dir = %base_dir.display(), "acquired single-instance lock");

    let shutdown = CancellationToken::new();
    let bus = EventBus::new();

    let sessions = SessionRegistry::start(persisted.watch_paths.clone(), bus.clone(), shutdown.clone());
    let transcripts = TranscriptWatcher::new(bus.clone());
    let permissions = PermissionWatcher::new(bus.clone(), base_dir.clone());
    permissions.spawn(shutdown.clone());
    spawn_watcher_bridge(bus.clone(), transcripts.clone(), permissions, shutdown.clone());
    info!(watch_paths = ?persisted.watch_paths, "watchers started");

    let clients = ClientRegistry::load(&base_dir)?;
    let pairing = Arc::new(PairingCoordinator::new(persisted.workstation_id.clone(), persisted.workstation_name.clone()));
    let pane: Arc<dyn PaneAdapter> = Arc::new(TmuxPaneAdapter::new());
    let dispatcher = Arc::new(Dispatcher::new(sessions.clone(), Arc::clone(&pane)));
    let connections = ConnectionTracker::new();

    let control_listener = bind_preferred(persisted.port_preferences.control_port, "control").await?;
    let data_listener = bind_preferred(persisted.port_preferences.data_port, "data").await?;
    let control_port = control_listener.local_addr()?.port();
    let data_port = data_listener.local_addr()?.port();

    write_state_file(&base_dir, control_port, data_port)?;
    persisted.port_preferences.control_port = Some(control_port);
    persisted.port_preferences.data_port = Some(data_port);
    persisted.save(&base_dir)?;
    info!(control_port, data_port, "listeners bound");

    let tunnel = persisted.tunnel.clone().and_then(|cfg| TunnelSupervisor::spawn(cfg, data_port, shutdown.clone()));
    let tunnel_stop = tunnel.as_ref().map(|t| t.stop_fn());

    let control_state = ControlState {
        started_at: Instant::now(),
        connections: connections.clone(),
        sessions: sessions.clone(),
        clients: clients.clone(),
        pairing: Arc::clone(&pairing),
        tunnel_stop,
        pane,
    };
    let data_state = DataState {
        bus,
        sessions,
        transcripts,
        clients,
        pairing,
        dispatcher,
        base_dir: base_dir.clone(),
        workstation_id: persisted.workstation_id.clone(),
        connections,
    };

    let control_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let result = axum::serve(control_listener, control::router(control_state))
            .with_graceful_shutdown(control_shutdown.cancelled_owned())
            .await;
        if let Err(e) = result {
            error!(error = %e, "control listener exited with an error");
        }
    });

    let data_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let result = axum::serve(data_listener, data::router(data_state))
            .with_graceful_shutdown(data_shutdown.cancelled_owned())
            .await;
        if let Err(e) = result {
            error!(error = %e, "data listener exited with an error");
        }
    });

    spawn_signal_handler(shutdown.clone());

    Ok(Daemon { base_dir, control_port, data_port, shutdown, _lock: lock })
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
