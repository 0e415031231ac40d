// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only per-session event log for permission requests and their
//! responses, so a pending request survives a daemon restart and can be
//! replayed during cursor catch-up (§4.9b, §6).

use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::bus::{BusEvent, EventBus, PermissionEvent};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// One entry in a session's event log. `PermissionResponse` entries
/// supersede the most recent unresponded `PermissionRequest` for the same
/// `tool_use_id` when computing the latest pending request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    PermissionRequest {
        tool_use_id: String,
        tool_name: String,
        timestamp: String,
        payload: serde_json::Value,
    },
    PermissionResponse {
        tool_use_id: String,
        timestamp: String,
    },
}

/// Handle to one session's event log file.
pub struct SessionEventLog {
    path: PathBuf,
}

impl SessionEventLog {
    pub fn new(base_dir: &Path, session_id: &str) -> Self {
        Self { path: base_dir.join("sessions").join(format!("{session_id}.events.jsonl")) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append_request(&self, event: &PermissionEvent) -> anyhow::Result<()> {
        self.append(&SessionEvent::PermissionRequest {
            tool_use_id: event.tool_use_id.clone(),
            tool_name: event.tool_name.clone(),
            timestamp: event.timestamp.clone(),
            payload: event.payload.clone(),
        })
    }

    pub fn append_response(&self, tool_use_id: &str, timestamp: &str) -> anyhow::Result<()> {
        self.append(&SessionEvent::PermissionResponse {
            tool_use_id: tool_use_id.to_string(),
            timestamp: timestamp.to_string(),
        })
    }

    fn append(&self, event: &SessionEvent) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// The most recent permission request that has no later response for the
    /// same `toolUseId`, if any (§4.9b). `session_id` on the returned event
    /// is left empty; callers attach the session id they already know.
    pub fn latest_pending_request(&self) -> Option<PermissionEvent> {
        let contents = std::fs::read_to_string(&self.path).ok()?;
        let mut pending: std::collections::HashMap<String, PermissionEvent> = std::collections::HashMap::new();

        for line in contents.lines() {
            let Ok(event) = serde_json::from_str::<SessionEvent>(line) else { continue };
            match event {
                SessionEvent::PermissionRequest { tool_use_id, tool_name, timestamp, payload } => {
                    pending.insert(
                        tool_use_id.clone(),
                        PermissionEvent { session_id: String::new(), tool_use_id, tool_name, timestamp, payload },
                    );
                }
                SessionEvent::PermissionResponse { tool_use_id, .. } => {
                    pending.remove(&tool_use_id);
                }
            }
        }

        pending.into_values().max_by(|a, b| a.timestamp.cmp(&b.timestamp))
    }
}

struct TailState {
    offset: u64,
}

/// Tails every session's `.events.jsonl` for newly appended permission
/// requests (written by a provider's hook, outside this process) and
/// re-emits them on the bus as `BusEvent::PermissionRequest`, mirroring the
/// transcript watcher's file-tailing role but for this smaller, flat file
/// set (no deferred-ancestor attachment: the directory always exists once a
/// session's first event is appended).
#[derive(Clone)]
pub struct PermissionWatcher {
    bus: EventBus,
    base_dir: PathBuf,
    tails: Arc<Mutex<HashMap<String, TailState>>>,
}

impl PermissionWatcher {
    pub fn new(bus: EventBus, base_dir: PathBuf) -> Self {
        Self { bus, base_dir, tails: Arc::new(Mutex::new(HashMap::new())) }
    }

    pub fn watch_session(&self, session_id: String) {
        let mut tails = self.tails.lock().unwrap_or_else(|e| e.into_inner());
        tails.entry(session_id).or_insert(TailState { offset: 0 });
    }

    pub fn unwatch_session(&self, session_id: &str) {
        let mut tails = self.tails.lock().unwrap_or_else(|e| e.into_inner());
        tails.remove(session_id);
    }

    pub fn spawn(&self, shutdown: CancellationToken) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut poll = tokio::time::interval(POLL_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = poll.tick() => {}
                }
                this.poll_once();
            }
        });
    }

    fn poll_once(&self) {
        let session_ids: Vec<String> = {
            let tails = self.tails.lock().unwrap_or_else(|e| e.into_inner());
            tails.keys().cloned().collect()
        };

        for session_id in session_ids {
            let log = SessionEventLog::new(&self.base_dir, &session_id);
            let new_lines = match read_new_lines(log.path(), &self.tails, &session_id) {
                Ok(lines) => lines,
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "permission event tail read error");
                    continue;
                }
            };

            for line in new_lines {
                let Ok(event) = serde_json::from_str::<SessionEvent>(&line) else { continue };
                if let SessionEvent::PermissionRequest { tool_use_id, tool_name, timestamp, payload } = event {
                    self.bus.emit(BusEvent::PermissionRequest {
                        session_id: session_id.clone(),
                        event: PermissionEvent {
                            session_id: session_id.clone(),
                            tool_use_id,
                            tool_name,
                            timestamp,
                            payload,
                        },
                    });
                }
            }
        }
    }
}

fn read_new_lines(
    path: &Path,
    tails: &Arc<Mutex<HashMap<String, TailState>>>,
    session_id: &str,
) -> anyhow::Result<Vec<String>> {
    use std::io::{BufRead, BufReader, Seek, SeekFrom};

    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut tails = tails.lock().unwrap_or_else(|e| e.into_inner());
    let Some(state) = tails.get_mut(session_id) else { return Ok(Vec::new()) };

    if let Ok(meta) = file.metadata() {
        if meta.len() < state.offset {
            state.offset = 0;
        }
    }

    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(state.offset))?;

    let mut lines = Vec::new();
    let mut line = String::new();
    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 || !line.ends_with('\n') {
            break;
        }
        state.offset += bytes_read as u64;
        lines.push(line.trim_end().to_string());
    }

    Ok(lines)
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
