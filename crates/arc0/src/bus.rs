// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-internal typed pub/sub. Delivery is synchronous on the emitter's
//! call stack (a `broadcast::send` never awaits); the bus owns nothing and
//! is not durable. See §4.1.

use tokio::sync::broadcast;

use crate::registry::session::Session;
use crate::transcript::TranscriptLine;

/// Permission-request event as carried on the bus (see §3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionEvent {
    pub session_id: String,
    pub tool_use_id: String,
    pub tool_name: String,
    pub timestamp: String,
    pub payload: serde_json::Value,
}

/// The bus's fixed set of event kinds.
#[derive(Debug, Clone)]
pub enum BusEvent {
    SessionStart(Session),
    SessionEnd { session_id: String },
    SessionsChange(Vec<Session>),
    MessagesNew { session_id: String, lines: Vec<TranscriptLine> },
    PermissionRequest { session_id: String, event: PermissionEvent },
}

/// Broadcast hub shared by every long-lived component that needs to observe
/// or emit bus events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        Self { tx }
    }

    /// `on(kind, handler)` in spec terms: subscribe to every event kind and
    /// filter client-side, matching the teacher's single aggregated channel.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    /// `emit(kind, payload)`. A dropped receiver (no subscribers) is not an
    /// error; the event is simply not observed by anyone.
    pub fn emit(&self, event: BusEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
