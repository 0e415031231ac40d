// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The on-wire envelope for encrypted Data transport frames: XChaCha20-Poly1305
//! with a random 24-byte nonce per message, base64-encoded for JSON transport.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

const ENVELOPE_VERSION: u8 = 1;

/// Encrypted payload as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub v: u8,
    pub nonce: String,
    pub ciphertext: String,
}

/// A 256-bit XChaCha20-Poly1305 key derived from the SPAKE2 shared secret.
pub struct EncryptionKey(XChaCha20Poly1305);

impl EncryptionKey {
    pub fn new(key_bytes: &[u8; 32]) -> Self {
        Self(XChaCha20Poly1305::new(Key::from_slice(key_bytes)))
    }

    /// Seal `plaintext` under a fresh random nonce, producing the wire envelope.
    pub fn seal(&self, plaintext: &[u8]) -> Envelope {
        let mut nonce_bytes = [0u8; 24];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        // XChaCha20Poly1305 only fails to encrypt on internal length limits we
        // never approach for single transcript-event frames.
        let ciphertext = self
            .0
            .encrypt(nonce, plaintext)
            .unwrap_or_else(|_| Vec::new());

        Envelope {
            v: ENVELOPE_VERSION,
            nonce: B64.encode(nonce_bytes),
            ciphertext: B64.encode(ciphertext),
        }
    }

    /// Open an envelope produced by [`Self::seal`] (by either side, since the
    /// key is symmetric).
    pub fn open(&self, envelope: &Envelope) -> Result<Vec<u8>, CryptoError> {
        if envelope.v != ENVELOPE_VERSION {
            return Err(CryptoError::InvalidEnvelope);
        }
        let nonce_bytes = B64
            .decode(&envelope.nonce)
            .map_err(|_| CryptoError::InvalidEnvelope)?;
        if nonce_bytes.len() != 24 {
            return Err(CryptoError::InvalidEnvelope);
        }
        let ciphertext = B64
            .decode(&envelope.ciphertext)
            .map_err(|_| CryptoError::InvalidEnvelope)?;
        let nonce = XNonce::from_slice(&nonce_bytes);

        self.0
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|_| CryptoError::DecryptFailed)
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
