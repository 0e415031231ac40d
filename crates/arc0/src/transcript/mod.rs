// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transcript ingest: tailing a dynamic set of append-only JSONL files. See
//! §4.2.

pub mod watcher;

pub use watcher::TranscriptWatcher;

/// One parsed transcript line: the opaque JSON value plus its extracted
/// `timestamp` field (empty string if absent). Per §3/§9, this system never
/// interprets the rest of the payload.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TranscriptLine {
    pub raw: serde_json::Value,
    pub timestamp: String,
}

impl TranscriptLine {
    /// Parse one JSONL line. Returns `None` for invalid JSON, which the
    /// caller skips without erroring per §4.2.
    pub fn parse(line: &str) -> Option<Self> {
        let raw: serde_json::Value = serde_json::from_str(line).ok()?;
        let timestamp = raw.get("timestamp").and_then(|v| v.as_str()).unwrap_or("").to_string();
        Some(Self { raw, timestamp })
    }
}
