// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

/// Errors produced by the cryptography layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("pairing code contains a character outside the alphabet")]
    InvalidPairingCodeChar,
    #[error("pairing code has the wrong length")]
    InvalidPairingCodeLength,
    #[error("SPAKE2 confirmation MAC did not match")]
    MacMismatch,
    #[error("AEAD decryption failed")]
    DecryptFailed,
    #[error("key material had the wrong length")]
    InvalidKeyLength,
    #[error("envelope was malformed or used an unsupported version")]
    InvalidEnvelope,
}
