// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State machine for the single active pairing attempt. Bridges the
//! human-entered pairing code to a SPAKE2 exchange and, on success, a new
//! [`PairedClient`](crate::registry::client::PairedClient) record. See §4.5.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arc0_crypto::{derive_keys, ConfirmLabel, PairingCode, Role, SharedSecret, Spake2};
use sha2::{Digest, Sha256};

use crate::error::ErrorCode;
use crate::registry::client::{ClientRegistry, PairedClient};

const DEFAULT_EXPIRY: Duration = Duration::from_secs(120);

enum Phase {
    Idle,
    /// Code advertised; no `pair:init` received yet.
    Advertising { code: PairingCode, expires_at: Instant },
    /// `pair:init` received and answered; awaiting `pair:confirm`.
    Challenged {
        code: PairingCode,
        expires_at: Instant,
        device_id: String,
        device_name: String,
        shared_secret: SharedSecret,
    },
}

struct State {
    phase: Phase,
    generation: u64,
    /// Latches `true` on a successful confirm; cleared by the next status
    /// read (§4.11's one-shot `completed` semantics).
    just_completed: Option<(String, String)>,
}

/// `{code, formattedCode, expiresAt}` returned by [`PairingCoordinator::start`].
pub struct PairingStart {
    pub code: String,
    pub formatted_code: String,
    pub expires_at: Instant,
}

/// Everything the caller needs to answer `pair:challenge` and, later, insert
/// the new device into the client registry.
pub struct PairInitResult {
    pub server_message: [u8; 32],
}

/// Result of a successful `pair:confirm`, sent back as `pair:complete` over
/// the unencrypted pairing channel (the SPAKE2 exchange is itself the
/// security boundary, not transport encryption; see §4.5).
pub struct PairConfirmResult {
    pub server_mac: [u8; 32],
    pub workstation_id: String,
    pub workstation_name: String,
    pub auth_token: [u8; 32],
    pub encryption_key: [u8; 32],
}

/// `{active, code?, remainingMs?, completed?, deviceId?, deviceName?}`.
pub struct PairingStatus {
    pub active: bool,
    pub code: Option<String>,
    pub remaining_ms: Option<u64>,
    pub completed: bool,
    pub device_id: Option<String>,
    pub device_name: Option<String>,
}

pub struct PairingCoordinator {
    state: Arc<Mutex<State>>,
    workstation_id: String,
    workstation_name: String,
    expiry: Duration,
}

impl PairingCoordinator {
    pub fn new(workstation_id: String, workstation_name: String) -> Self {
        Self::with_expiry(workstation_id, workstation_name, DEFAULT_EXPIRY)
    }

    pub fn with_expiry(workstation_id: String, workstation_name: String, expiry: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                phase: Phase::Idle,
                generation: 0,
                just_completed: None,
            })),
            workstation_id,
            workstation_name,
            expiry,
        }
    }

    /// Generate a fresh pairing code. Rejects concurrent attempts.
    pub fn start(&self) -> Result<PairingStart, ErrorCode> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !matches!(state.phase, Phase::Idle) {
            return Err(ErrorCode::AlreadyPaired);
        }

        let code = PairingCode::generate();
        let expires_at = Instant::now() + self.expiry;
        state.generation += 1;
        let generation = state.generation;
        state.phase = Phase::Advertising { code: code.clone(), expires_at };

        drop(state);
        self.spawn_expiry_watch(generation, expires_at);

        Ok(PairingStart {
            code: code.as_str().to_string(),
            formatted_code: code.formatted(),
            expires_at,
        })
    }

    fn spawn_expiry_watch(&self, generation: u64, expires_at: Instant) {
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let now = Instant::now();
            if expires_at > now {
                tokio::time::sleep(expires_at - now).await;
            }
            let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
            if state.generation == generation && !matches!(state.phase, Phase::Idle) {
                state.phase = Phase::Idle;
            }
        });
    }

    /// `handlePairInit`: valid while a code is advertised (whether or not a
    /// prior `pair:init` already answered — a retried `pair:init` simply
    /// re-derives a fresh server message).
    pub fn handle_pair_init(
        &self,
        device_id: String,
        device_name: String,
        client_message: [u8; 32],
    ) -> Result<PairInitResult, ErrorCode> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let (code, expires_at) = match &state.phase {
            Phase::Advertising { code, expires_at } => (code.clone(), *expires_at),
            Phase::Challenged { code, expires_at, .. } => (code.clone(), *expires_at),
            Phase::Idle => return Err(ErrorCode::InvalidCode),
        };

        let (server_state, server_message) = Spake2::start(Role::Server, code.as_str());
        let shared_secret = server_state
            .finish(&client_message)
            .map_err(|_| ErrorCode::InvalidPayload)?;

        state.phase = Phase::Challenged {
            code,
            expires_at,
            device_id,
            device_name,
            shared_secret,
        };

        Ok(PairInitResult { server_message })
    }

    /// `handlePairConfirm`: verify the client's confirmation MAC, derive
    /// keys, and insert the new paired client.
    pub fn handle_pair_confirm(
        &self,
        mac: &[u8],
        registry: &ClientRegistry,
        now: &str,
    ) -> Result<PairConfirmResult, ErrorCode> {
        let (device_id, device_name, shared_secret, code, expires_at) = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match std::mem::replace(&mut state.phase, Phase::Idle) {
                Phase::Challenged { code, expires_at, device_id, device_name, shared_secret } => {
                    (device_id, device_name, shared_secret, code, expires_at)
                }
                other => {
                    state.phase = other;
                    return Err(ErrorCode::InvalidCode);
                }
            }
        };

        if shared_secret.verify(ConfirmLabel::Client, mac).is_err() {
            // Mismatch: the code remains valid until expiry (§4.5, §9).
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.phase = Phase::Advertising { code, expires_at };
            return Err(ErrorCode::MacMismatch);
        }

        let keys = derive_keys(&shared_secret).map_err(|_| ErrorCode::Internal)?;
        let auth_token_hash = hex::encode(Sha256::digest(keys.auth_token));
        let encryption_key_b64 = {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD.encode(keys.encryption_key)
        };

        registry
            .add(PairedClient {
                device_id: device_id.clone(),
                device_name: device_name.clone(),
                auth_token_hash,
                encryption_key: encryption_key_b64,
                created_at: now.to_string(),
                last_seen: None,
            })
            .map_err(|_| ErrorCode::Internal)?;

        let server_mac = shared_secret.server_confirm().map_err(|_| ErrorCode::Internal)?;

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.phase = Phase::Idle;
        state.just_completed = Some((device_id.clone(), device_name.clone()));

        Ok(PairConfirmResult {
            server_mac,
            workstation_id: self.workstation_id.clone(),
            workstation_name: self.workstation_name.clone(),
            auth_token: keys.auth_token,
            encryption_key: keys.encryption_key,
        })
    }

    /// Explicit abort; any in-flight confirmer should be told `TIMEOUT`.
    pub fn cancel(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.phase = Phase::Idle;
    }

    pub fn status(&self) -> PairingStatus {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let completed = state.just_completed.take();

        match &state.phase {
            Phase::Idle => PairingStatus {
                active: false,
                code: None,
                remaining_ms: None,
                completed: completed.is_some(),
                device_id: completed.as_ref().map(|(id, _)| id.clone()),
                device_name: completed.as_ref().map(|(_, name)| name.clone()),
            },
            Phase::Advertising { code, expires_at } => PairingStatus {
                active: true,
                code: Some(code.formatted()),
                remaining_ms: Some(remaining_ms(*expires_at)),
                completed: false,
                device_id: None,
                device_name: None,
            },
            Phase::Challenged { code, expires_at, device_id, device_name, .. } => PairingStatus {
                active: true,
                code: Some(code.formatted()),
                remaining_ms: Some(remaining_ms(*expires_at)),
                completed: false,
                device_id: Some(device_id.clone()),
                device_name: Some(device_name.clone()),
            },
        }
    }
}

fn remaining_ms(expires_at: Instant) -> u64 {
    expires_at.saturating_duration_since(Instant::now()).as_millis() as u64
}

#[cfg(test)]
#[path = "pairing_tests.rs"]
mod tests;
