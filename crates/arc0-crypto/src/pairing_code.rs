// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Human-entered pairing code: 8 characters from an unambiguous 32-symbol
//! alphabet (40 bits of entropy), displayed as `XXXX-XXXX`.

use rand::RngCore;

use crate::error::CryptoError;

/// Alphabet with ambiguous characters (`0`, `O`, `1`, `I`, `L`) removed.
pub const ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const CODE_LEN: usize = 8;

/// A validated pairing code: exactly 8 characters from [`ALPHABET`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairingCode(String);

impl PairingCode {
    /// Generate a fresh random pairing code.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let mut out = String::with_capacity(CODE_LEN);
        for _ in 0..CODE_LEN {
            let idx = (rng.next_u32() as usize) % ALPHABET.len();
            out.push(ALPHABET[idx] as char);
        }
        Self(out)
    }

    /// Parse user input into a validated pairing code.
    ///
    /// Strips dashes and whitespace, uppercases, then validates every
    /// character is in [`ALPHABET`] and the length is exactly 8.
    pub fn parse(input: &str) -> Result<Self, CryptoError> {
        let cleaned: String = input
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .flat_map(|c| c.to_uppercase())
            .collect();

        if cleaned.len() != CODE_LEN {
            return Err(CryptoError::InvalidPairingCodeLength);
        }
        for c in cleaned.chars() {
            if !ALPHABET.contains(&(c as u8)) {
                return Err(CryptoError::InvalidPairingCodeChar);
            }
        }
        Ok(Self(cleaned))
    }

    /// Raw 8-character code (no dashes), used as the SPAKE2 password.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Human-friendly `XXXX-XXXX` display form.
    pub fn formatted(&self) -> String {
        format!("{}-{}", &self.0[..4], &self.0[4..])
    }
}

impl std::fmt::Display for PairingCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.formatted())
    }
}

#[cfg(test)]
#[path = "pairing_code_tests.rs"]
mod tests;
