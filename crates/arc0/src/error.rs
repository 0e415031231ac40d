// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unified error codes shared across the Control HTTP plane, the Data
//! transport acks, and the pairing flow.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire-visible error code, carried in `ActionResult`, `pair:error`, and
/// `protocol:error` payloads as well as Control-plane HTTP error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidCwd,
    TmuxNotInstalled,
    ProviderNotFound,
    SessionCreateFailed,
    SessionNotFound,
    PaneNotFound,
    InvalidPayload,
    DecryptError,
    ProtocolMismatch,
    InvalidCode,
    InvalidFormat,
    Timeout,
    MacMismatch,
    AlreadyPaired,
    PairingDisabled,
    Unauthorized,
    Internal,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidCwd => 400,
            Self::TmuxNotInstalled => 503,
            Self::ProviderNotFound => 404,
            Self::SessionCreateFailed => 500,
            Self::SessionNotFound => 404,
            Self::PaneNotFound => 404,
            Self::InvalidPayload => 400,
            Self::DecryptError => 400,
            Self::ProtocolMismatch => 400,
            Self::InvalidCode => 400,
            Self::InvalidFormat => 400,
            Self::Timeout => 408,
            Self::MacMismatch => 401,
            Self::AlreadyPaired => 409,
            Self::PairingDisabled => 403,
            Self::Unauthorized => 401,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidCwd => "INVALID_CWD",
            Self::TmuxNotInstalled => "TMUX_NOT_INSTALLED",
            Self::ProviderNotFound => "PROVIDER_NOT_FOUND",
            Self::SessionCreateFailed => "SESSION_CREATE_FAILED",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::PaneNotFound => "PANE_NOT_FOUND",
            Self::InvalidPayload => "INVALID_PAYLOAD",
            Self::DecryptError => "DECRYPT_ERROR",
            Self::ProtocolMismatch => "PROTOCOL_MISMATCH",
            Self::InvalidCode => "INVALID_CODE",
            Self::InvalidFormat => "INVALID_FORMAT",
            Self::Timeout => "TIMEOUT",
            Self::MacMismatch => "MAC_MISMATCH",
            Self::AlreadyPaired => "ALREADY_PAIRED",
            Self::PairingDisabled => "PAIRING_DISABLED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an action dispatched against a terminal pane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ActionResult {
    Success,
    Error { code: ErrorCode, message: String },
}

impl ActionResult {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error { code, message: message.into() }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
