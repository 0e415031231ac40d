// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HKDF-SHA256 expansion from the SPAKE2 transcript secret `K` into the two
//! keys the daemon actually uses: a bearer token for the Control plane and an
//! AEAD key for the Data transport.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::CryptoError;
use crate::spake2::SharedSecret;

/// Keys derived from a completed pairing, ready to hand to the transport
/// layer.
pub struct DerivedKeys {
    pub auth_token: [u8; 32],
    pub encryption_key: [u8; 32],
}

/// Expand `secret` into `auth_token` and `encryption_key` using distinct
/// HKDF `info` strings so the two keys are independent even though they
/// share the same input keying material.
pub fn derive_keys(secret: &SharedSecret) -> Result<DerivedKeys, CryptoError> {
    let hk = Hkdf::<Sha256>::new(None, secret.as_bytes());

    let mut auth_token = [0u8; 32];
    hk.expand(b"arc0-pair-auth-v1", &mut auth_token)
        .map_err(|_| CryptoError::InvalidKeyLength)?;

    let mut encryption_key = [0u8; 32];
    hk.expand(b"arc0-pair-enc-v1", &mut encryption_key)
        .map_err(|_| CryptoError::InvalidKeyLength)?;

    Ok(DerivedKeys { auth_token, encryption_key })
}

#[cfg(test)]
#[path = "kdf_tests.rs"]
mod tests;
