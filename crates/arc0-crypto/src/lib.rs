// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cryptographic primitives for arc0d's pairing handshake and Data transport:
//! SPAKE2 over Ed25519, HKDF-SHA256 key derivation, XChaCha20-Poly1305
//! envelopes, and the pairing-code codec.

pub mod envelope;
pub mod error;
pub mod kdf;
pub mod pairing_code;
pub mod spake2;
pub mod token;

pub use envelope::{EncryptionKey, Envelope};
pub use error::CryptoError;
pub use kdf::{derive_keys, DerivedKeys};
pub use pairing_code::PairingCode;
pub use spake2::{ConfirmLabel, Role, SharedSecret, Spake2};
