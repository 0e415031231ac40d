// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tracks which agent sessions are currently live by scanning each watched
//! directory's `.sessions/*.json` liveness-marker files. See §4.3.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bus::{BusEvent, EventBus};
use crate::pane::PaneAdapter;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Which agent CLI a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Claude,
    Codex,
    Gemini,
}

/// On-disk liveness marker written by the agent CLI's own session bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionDescriptor {
    session_id: String,
    provider: Provider,
    cwd: PathBuf,
    started_at: String,
    transcript_path: PathBuf,
    #[serde(default)]
    tty: Option<String>,
}

/// A live agent conversation (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub provider: Provider,
    pub cwd: PathBuf,
    pub started_at: String,
    pub transcript_path: PathBuf,
    pub tty: Option<String>,
}

impl From<SessionDescriptor> for Session {
    fn from(d: SessionDescriptor) -> Self {
        Self {
            session_id: d.session_id,
            provider: d.provider,
            cwd: d.cwd,
            started_at: d.started_at,
            transcript_path: d.transcript_path,
            tty: d.tty,
        }
    }
}

/// Wire shape of a session (§4.9 step 2): `Session` plus the derived
/// `interactive` field, which isn't part of the on-disk descriptor since it
/// reflects live pane state rather than anything the agent CLI writes down.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub session_id: String,
    pub provider: Provider,
    pub cwd: PathBuf,
    pub started_at: String,
    pub transcript_path: PathBuf,
    pub tty: Option<String>,
    pub interactive: bool,
}

impl Session {
    /// `interactive = tty is non-empty AND a pane currently exists with that
    /// tty`, computed on demand via the pane adapter (§4.3).
    pub async fn to_session_data(&self, pane: &dyn PaneAdapter) -> SessionData {
        let interactive = match self.tty.as_deref() {
            Some(tty) if !tty.is_empty() => pane.find_pane_by_tty(tty).await.is_some(),
            _ => false,
        };
        SessionData {
            session_id: self.session_id.clone(),
            provider: self.provider,
            cwd: self.cwd.clone(),
            started_at: self.started_at.clone(),
            transcript_path: self.transcript_path.clone(),
            tty: self.tty.clone(),
            interactive,
        }
    }
}

/// Map a snapshot of sessions to their wire shape, one `find_pane_by_tty`
/// call at a time.
pub async fn sessions_to_wire(sessions: &[Session], pane: &dyn PaneAdapter) -> Vec<SessionData> {
    let mut out = Vec::with_capacity(sessions.len());
    for session in sessions {
        out.push(session.to_session_data(pane).await);
    }
    out
}

struct Inner {
    bus: EventBus,
    sessions: Mutex<HashMap<String, Session>>,
}

/// Handle to the session-tracking subsystem.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

impl SessionRegistry {
    /// Start scanning `watch_paths` (each expected to contain a `.sessions`
    /// subdirectory of descriptor files) and return a handle immediately;
    /// the initial enumeration and subsequent reconciliation run in a
    /// background task until `shutdown` is cancelled.
    pub fn start(watch_paths: Vec<PathBuf>, bus: EventBus, shutdown: CancellationToken) -> Self {
        let inner = Arc::new(Inner { bus, sessions: Mutex::new(HashMap::new()) });
        tokio::spawn(run(Arc::clone(&inner), watch_paths, shutdown));
        Self { inner }
    }

    /// Read snapshot of currently live sessions.
    pub fn get_active_sessions(&self) -> Vec<Session> {
        let sessions = self.inner.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.values().cloned().collect()
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        let sessions = self.inner.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get(session_id).cloned()
    }
}

async fn run(inner: Arc<Inner>, watch_paths: Vec<PathBuf>, shutdown: CancellationToken) {
    let (wake_tx, mut wake_rx) = mpsc::channel::<()>(8);
    let _watchers: Vec<RecommendedWatcher> = watch_paths
        .iter()
        .filter_map(|p| setup_dir_watcher(&p.join(".sessions"), wake_tx.clone()))
        .collect();

    // Initial enumeration: emit session:start for each, then sessions:change.
    reconcile(&inner, &watch_paths, true);

    let mut poll = tokio::time::interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = wake_rx.recv() => {}
            _ = poll.tick() => {}
        }
        reconcile(&inner, &watch_paths, false);
    }
}

fn reconcile(inner: &Arc<Inner>, watch_paths: &[PathBuf], initial: bool) {
    let discovered = scan_descriptors(watch_paths);

    let mut sessions = inner.sessions.lock().unwrap_or_else(|e| e.into_inner());
    let mut changed = initial;

    let discovered_ids: std::collections::HashSet<&str> =
        discovered.iter().map(|s| s.session_id.as_str()).collect();

    let ended: Vec<String> = sessions
        .keys()
        .filter(|id| !discovered_ids.contains(id.as_str()))
        .cloned()
        .collect();
    for id in &ended {
        sessions.remove(id);
        changed = true;
        inner.bus.emit(BusEvent::SessionEnd { session_id: id.clone() });
    }

    for session in discovered {
        if !sessions.contains_key(&session.session_id) {
            changed = true;
            inner.bus.emit(BusEvent::SessionStart(session.clone()));
            sessions.insert(session.session_id.clone(), session);
        }
    }

    if changed {
        let snapshot: Vec<Session> = sessions.values().cloned().collect();
        inner.bus.emit(BusEvent::SessionsChange(snapshot));
    }
}

fn scan_descriptors(watch_paths: &[PathBuf]) -> Vec<Session> {
    let mut out = Vec::new();
    for base in watch_paths {
        let dir = base.join(".sessions");
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(bytes) = std::fs::read(&path) else { continue };
            let Ok(descriptor) = serde_json::from_slice::<SessionDescriptor>(&bytes) else {
                continue;
            };
            out.push(Session::from(descriptor));
        }
    }
    out
}

fn setup_dir_watcher(dir: &Path, wake_tx: mpsc::Sender<()>) -> Option<RecommendedWatcher> {
    if !dir.exists() {
        debug!(dir = %dir.display(), "session watch dir does not exist yet, relying on poll fallback");
        return None;
    }
    let mut watcher = notify::recommended_watcher(move |_: notify::Result<notify::Event>| {
        let _ = wake_tx.try_send(());
    })
    .ok()?;
    watcher.watch(dir, RecursiveMode::NonRecursive).ok()?;
    Some(watcher)
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
