// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Encodes derived auth-token bytes for the wire. The Data transport's own
//! handshake check (`ClientRegistry::validate`) compares a SHA-256 hash of
//! the presented token against the hash stored in `clients.json`, so the
//! raw bytes encoded here are never compared directly once persisted.

use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use base64::Engine;

/// Encode derived token bytes as the string sent in the `Authorization` header.
pub fn encode_token(token: &[u8; 32]) -> String {
    B64.encode(token)
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
