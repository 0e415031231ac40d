// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tails a dynamic set of `(sessionId → transcriptPath)` files, tolerating
//! paths whose parent directories don't exist yet ("deferred attachment",
//! §4.2).
//!
//! A session whose parent directory is missing registers with a shared,
//! ref-counted watcher on the nearest existing ancestor directory. Once that
//! ancestor watcher observes the parent coming into existence, the session
//! is promoted to a direct file tail. This mirrors the teacher's parent-dir
//! `notify` watch plus polling fallback, generalized with the ancestor
//! registration step the teacher's simpler watcher doesn't need.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::bus::{BusEvent, EventBus};
use crate::transcript::TranscriptLine;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const STABILITY_DELAY: Duration = Duration::from_millis(100);
const ANCESTOR_RECHECK: Duration = Duration::from_millis(250);

struct SessionEntry {
    path: PathBuf,
    cache: Vec<TranscriptLine>,
    offset: u64,
}

struct AncestorWatch {
    _watcher: RecommendedWatcher,
    ref_count: usize,
    wake: watch::Sender<()>,
    sessions: HashSet<String>,
}

struct Inner {
    bus: EventBus,
    sessions: Mutex<HashMap<String, SessionEntry>>,
    cancels: Mutex<HashMap<String, CancellationToken>>,
    ancestors: Mutex<HashMap<PathBuf, AncestorWatch>>,
}

/// Handle to the transcript-tailing subsystem. Cheap to clone; every clone
/// shares the same session cache and background tasks.
#[derive(Clone)]
pub struct TranscriptWatcher {
    inner: Arc<Inner>,
}

impl TranscriptWatcher {
    pub fn new(bus: EventBus) -> Self {
        Self {
            inner: Arc::new(Inner {
                bus,
                sessions: Mutex::new(HashMap::new()),
                cancels: Mutex::new(HashMap::new()),
                ancestors: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Begin watching `path` for `session_id`. Idempotent for an unchanged
    /// `(session_id, path)` pair; re-targets (cancel + restart) otherwise.
    pub fn watch_session(&self, session_id: String, path: PathBuf) {
        {
            let sessions = self.inner.sessions.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(existing) = sessions.get(&session_id) {
                if existing.path == path {
                    return;
                }
            }
        }
        self.unwatch_session(&session_id);

        {
            let mut sessions = self.inner.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.insert(
                session_id.clone(),
                SessionEntry { path: path.clone(), cache: Vec::new(), offset: 0 },
            );
        }

        let cancel = CancellationToken::new();
        {
            let mut cancels = self.inner.cancels.lock().unwrap_or_else(|e| e.into_inner());
            cancels.insert(session_id.clone(), cancel.clone());
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(run_session(inner, session_id, path, cancel));
    }

    /// Stop watching `session_id`: cancel its task, drop its cached lines and
    /// file position.
    pub fn unwatch_session(&self, session_id: &str) {
        let cancel = {
            let mut cancels = self.inner.cancels.lock().unwrap_or_else(|e| e.into_inner());
            cancels.remove(session_id)
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        let mut sessions = self.inner.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.remove(session_id);
    }

    /// Cached lines for `session_id` with `timestamp` lexicographically
    /// greater than `last_ts`, in file order.
    pub fn get_lines_since(&self, session_id: &str, last_ts: &str) -> Vec<TranscriptLine> {
        let sessions = self.inner.sessions.lock().unwrap_or_else(|e| e.into_inner());
        match sessions.get(session_id) {
            Some(entry) => {
                entry.cache.iter().filter(|l| l.timestamp.as_str() > last_ts).cloned().collect()
            }
            None => Vec::new(),
        }
    }
}

async fn run_session(
    inner: Arc<Inner>,
    session_id: String,
    path: PathBuf,
    cancel: CancellationToken,
) {
    let parent = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));

    if !parent.exists() {
        if await_parent_creation(&inner, &session_id, &parent, &cancel).await.is_err() {
            return;
        }
    }

    tokio::time::sleep(STABILITY_DELAY).await;

    let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
    let _file_watcher = setup_dir_watcher(&parent, wake_tx);
    let mut poll = tokio::time::interval(POLL_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = wake_rx.recv() => {}
            _ = poll.tick() => {}
        }

        let new_lines = {
            let mut sessions = inner.sessions.lock().unwrap_or_else(|e| e.into_inner());
            let Some(entry) = sessions.get_mut(&session_id) else { return };
            match read_new_lines(&entry.path, &mut entry.offset) {
                Ok(raw_lines) if !raw_lines.is_empty() => {
                    let parsed: Vec<TranscriptLine> =
                        raw_lines.iter().filter_map(|l| TranscriptLine::parse(l)).collect();
                    entry.cache.extend(parsed.iter().cloned());
                    parsed
                }
                Ok(_) => Vec::new(),
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "transcript watcher read error");
                    Vec::new()
                }
            }
        };

        if !new_lines.is_empty() {
            inner.bus.emit(BusEvent::MessagesNew {
                session_id: session_id.clone(),
                lines: new_lines,
            });
        }
    }
}

/// Step 1-4 of deferred attachment: find the nearest existing ancestor,
/// register with its shared watcher, and wait until `parent` exists.
async fn await_parent_creation(
    inner: &Arc<Inner>,
    session_id: &str,
    parent: &Path,
    cancel: &CancellationToken,
) -> Result<(), ()> {
    let ancestor = nearest_existing_ancestor(parent);
    let mut wake_rx = register_ancestor(inner, &ancestor, session_id);

    let result = loop {
        if parent.exists() {
            break Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => break Err(()),
            changed = wake_rx.changed() => {
                if changed.is_err() {
                    // Ancestor watcher itself died; fall back to pure polling.
                }
            }
            _ = tokio::time::sleep(ANCESTOR_RECHECK) => {}
        }
    };

    unregister_ancestor(inner, &ancestor, session_id);
    result
}

fn nearest_existing_ancestor(start: &Path) -> PathBuf {
    let mut cur = start.to_path_buf();
    loop {
        if cur.as_os_str().is_empty() || cur.exists() {
            return cur;
        }
        match cur.parent() {
            Some(p) => cur = p.to_path_buf(),
            None => return cur,
        }
    }
}

fn register_ancestor(inner: &Arc<Inner>, ancestor: &Path, session_id: &str) -> watch::Receiver<()> {
    let mut ancestors = inner.ancestors.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(existing) = ancestors.get_mut(ancestor) {
        existing.ref_count += 1;
        existing.sessions.insert(session_id.to_string());
        return existing.wake.subscribe();
    }

    let (wake_tx, wake_rx) = watch::channel(());
    let wake_tx_for_watcher = wake_tx.clone();
    let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if res.is_ok() {
            let _ = wake_tx_for_watcher.send(());
        }
    });

    let watcher = match watcher {
        Ok(mut w) => {
            if let Err(e) = w.watch(ancestor, RecursiveMode::Recursive) {
                debug!(ancestor = %ancestor.display(), error = %e, "failed to watch ancestor dir");
            }
            w
        }
        Err(e) => {
            debug!(error = %e, "failed to create ancestor watcher, falling back to polling only");
            // Still return a receiver; the polling fallback in the caller covers us.
            return wake_rx;
        }
    };

    ancestors.insert(
        ancestor.to_path_buf(),
        AncestorWatch {
            _watcher: watcher,
            ref_count: 1,
            wake: wake_tx,
            sessions: HashSet::from([session_id.to_string()]),
        },
    );
    wake_rx
}

fn unregister_ancestor(inner: &Arc<Inner>, ancestor: &Path, session_id: &str) {
    let mut ancestors = inner.ancestors.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(entry) = ancestors.get_mut(ancestor) {
        entry.sessions.remove(session_id);
        entry.ref_count = entry.ref_count.saturating_sub(1);
        if entry.ref_count == 0 {
            ancestors.remove(ancestor);
        }
    }
}

/// Watch `dir` (non-recursive) so file creation/change under it wakes the
/// tailing loop, matching the teacher's parent-dir `notify` watch.
fn setup_dir_watcher(dir: &Path, wake_tx: mpsc::Sender<()>) -> Option<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |_: notify::Result<notify::Event>| {
        let _ = wake_tx.try_send(());
    })
    .ok()?;
    watcher.watch(dir, RecursiveMode::NonRecursive).ok()?;
    Some(watcher)
}

/// Read newly appended lines since `*offset`, updating `*offset`. Resets to
/// 0 on detected truncation (undefined-behavior case per §1's Non-goals;
/// we simply re-read from scratch rather than erroring).
fn read_new_lines(path: &Path, offset: &mut u64) -> anyhow::Result<Vec<String>> {
    use std::io::{BufRead, BufReader, Seek, SeekFrom};

    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    if let Ok(meta) = file.metadata() {
        if meta.len() < *offset {
            *offset = 0;
        }
    }

    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(*offset))?;

    let mut lines = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            break;
        }
        if !line.ends_with('\n') {
            // Partial line at EOF; wait for the rest on the next tick.
            break;
        }
        *offset += bytes_read as u64;
        let trimmed = line.trim_end();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }

    Ok(lines)
}

#[cfg(test)]
#[path = "watcher_tests.rs"]
mod tests;
