// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire message types for the Data transport, internally tagged on `event`
//! to match the event-with-ack vocabulary in §4.7.

use serde::{Deserialize, Serialize};

use crate::error::{ActionResult, ErrorCode};

/// One element of an `init` cursor: the client's last-seen position in a
/// session's merged stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorEntry {
    pub session_id: String,
    #[serde(default)]
    pub last_message_ts: Option<String>,
    #[serde(default)]
    pub last_message_id: Option<String>,
}

/// Client-to-server events (§4.7, §6). The `event` tag's own variant names
/// use their literal wire spelling (including the `:`-namespaced ones);
/// `rename_all` below only governs the field names nested inside each
/// variant.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename = "pair:init")]
    PairInit { device_id: String, device_name: String, spake2_message: String },
    #[serde(rename = "pair:confirm")]
    PairConfirm { mac: String },
    Init { device_id: String, protocol_version: String, #[serde(default)] cursor: Vec<CursorEntry> },
    Ping { id: String },
    Ack { batch_id: String },
    #[serde(rename = "openSession")]
    OpenSession { request_id: String, payload: serde_json::Value },
    #[serde(rename = "sendPrompt")]
    SendPrompt { request_id: String, payload: serde_json::Value },
    #[serde(rename = "stopAgent")]
    StopAgent { request_id: String, payload: serde_json::Value },
    #[serde(rename = "approveToolUse")]
    ApproveToolUse { request_id: String, payload: serde_json::Value },
}

/// Server-to-client events. `Sessions`/`Projects`/`Messages`/
/// `PermissionRequestAsMessage`/`ActionResult` are wrapped in an AEAD
/// envelope before hitting the wire whenever the socket has an encryption
/// context (§4.7); `PairChallenge`/`PairComplete`/`PairError`/
/// `ProtocolError` never are.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ServerMessage {
    Sessions { payload: serde_json::Value },
    Projects { payload: serde_json::Value },
    Messages { batch_id: String, payload: serde_json::Value },
    #[serde(rename = "permission:request-as-message")]
    PermissionRequestAsMessage { batch_id: String, payload: serde_json::Value },
    #[serde(rename = "pair:challenge")]
    PairChallenge { spake2_message: String },
    #[serde(rename = "pair:complete")]
    PairComplete {
        mac: String,
        workstation_id: String,
        workstation_name: String,
        auth_token: String,
        encryption_key: String,
    },
    #[serde(rename = "pair:error")]
    PairError { code: String, message: String },
    #[serde(rename = "protocol:error")]
    ProtocolError { code: String, expected: String, received: String },
    ActionResult { request_id: String, result: ActionResult },
    Pong { id: String },
}

impl ServerMessage {
    /// Whether this event is exempt from AEAD wrapping, per §4.7's
    /// encryption policy.
    pub fn is_plaintext(&self) -> bool {
        matches!(
            self,
            Self::PairChallenge { .. }
                | Self::PairComplete { .. }
                | Self::PairError { .. }
                | Self::ProtocolError { .. }
        )
    }
}

pub fn pair_error(code: ErrorCode, message: impl Into<String>) -> ServerMessage {
    ServerMessage::PairError { code: code.as_str().to_string(), message: message.into() }
}
