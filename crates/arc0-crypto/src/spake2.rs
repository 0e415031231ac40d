// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SPAKE2 password-authenticated key exchange on Ed25519, with
//! nothing-up-my-sleeve generators `M` and `N` derived from domain-separated
//! SHA-256 hashes of fixed strings.
//!
//! This is a from-scratch instantiation (not the `spake2` crate's Ristretto
//! group): the wire format and constants are fixed by the protocol this
//! daemon speaks to its mobile/web clients, so the scalar and point
//! arithmetic is done directly against `curve25519-dalek`'s Edwards group.

use curve25519_dalek::constants::ED25519_BASEPOINT_POINT;
use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

const TRANSCRIPT_DOMAIN: &[u8] = b"arc0-spake2-v1";

/// Which side of the exchange this party is playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

fn hash_to_scalar(domain_prefixed: &[u8]) -> Scalar {
    let digest = Sha256::digest(domain_prefixed);
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    Scalar::from_bytes_mod_order(bytes)
}

fn m_point() -> EdwardsPoint {
    hash_to_scalar(b"arc0-spake2-M-v1") * ED25519_BASEPOINT_POINT
}

fn n_point() -> EdwardsPoint {
    hash_to_scalar(b"arc0-spake2-N-v1") * ED25519_BASEPOINT_POINT
}

/// `pw = SHA-256("arc0-spake2-pw:" || password) mod n`.
fn password_scalar(password: &str) -> Scalar {
    let mut input = Vec::with_capacity(16 + password.len());
    input.extend_from_slice(b"arc0-spake2-pw:");
    input.extend_from_slice(password.as_bytes());
    hash_to_scalar(&input)
}

fn random_scalar() -> Scalar {
    let mut wide = [0u8; 64];
    rand::rng().fill_bytes(&mut wide);
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// One party's in-progress SPAKE2 state, consumed by [`Spake2::finish`].
pub struct Spake2 {
    role: Role,
    secret: Scalar,
    pw: Scalar,
    own_msg: [u8; 32],
}

impl Spake2 {
    /// Start an exchange with the given password (the pairing code), the
    /// instigator's local secret, and return the message to send to the peer.
    pub fn start(role: Role, password: &str) -> (Self, [u8; 32]) {
        let secret = random_scalar();
        let pw = password_scalar(password);
        let own_mask = match role {
            Role::Client => m_point(),
            Role::Server => n_point(),
        };
        let own_point = EdwardsPoint::mul_base(&secret) + pw * own_mask;
        let own_msg = own_point.compress().to_bytes();
        (Self { role, secret, pw, own_msg }, own_msg)
    }

    /// Complete the exchange given the peer's message, producing the shared
    /// transcript secret `K`.
    pub fn finish(self, peer_msg: &[u8; 32]) -> Result<SharedSecret, CryptoError> {
        let peer_point = CompressedEdwardsY(*peer_msg)
            .decompress()
            .ok_or(CryptoError::InvalidEnvelope)?;
        let peer_mask = match self.role {
            Role::Client => n_point(),
            Role::Server => m_point(),
        };
        let z = (peer_point - self.pw * peer_mask) * self.secret;
        let z_bytes = z.compress().to_bytes();

        let (client_msg, server_msg) = match self.role {
            Role::Client => (self.own_msg, *peer_msg),
            Role::Server => (*peer_msg, self.own_msg),
        };

        let mut hasher = Sha256::new();
        hasher.update(TRANSCRIPT_DOMAIN);
        hasher.update(client_msg);
        hasher.update(server_msg);
        hasher.update(z_bytes);
        let k: [u8; 32] = hasher.finalize().into();

        Ok(SharedSecret { k })
    }
}

/// The shared transcript secret `K = SHA-256(transcript)`, plus confirmation
/// MAC helpers.
#[derive(Clone)]
pub struct SharedSecret {
    k: [u8; 32],
}

impl SharedSecret {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.k
    }

    fn confirm_mac(&self, label: &[u8]) -> Result<[u8; 32], CryptoError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.k).map_err(|_| CryptoError::InvalidKeyLength)?;
        mac.update(label);
        Ok(mac.finalize().into_bytes().into())
    }

    /// `HMAC-SHA256(K, "client-confirm")`.
    pub fn client_confirm(&self) -> Result<[u8; 32], CryptoError> {
        self.confirm_mac(b"client-confirm")
    }

    /// `HMAC-SHA256(K, "server-confirm")`.
    pub fn server_confirm(&self) -> Result<[u8; 32], CryptoError> {
        self.confirm_mac(b"server-confirm")
    }

    /// Constant-time verification of a peer-supplied confirmation MAC.
    pub fn verify(&self, expected_label: ConfirmLabel, mac: &[u8]) -> Result<(), CryptoError> {
        let expected = match expected_label {
            ConfirmLabel::Client => self.client_confirm()?,
            ConfirmLabel::Server => self.server_confirm()?,
        };
        if expected.ct_eq(mac).into() {
            Ok(())
        } else {
            Err(CryptoError::MacMismatch)
        }
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.k.zeroize();
    }
}

/// Which confirmation tag to verify against.
#[derive(Debug, Clone, Copy)]
pub enum ConfirmLabel {
    Client,
    Server,
}

#[cfg(test)]
#[path = "spake2_tests.rs"]
mod tests;
