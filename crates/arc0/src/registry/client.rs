// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Paired-device registry: `deviceId → {authTokenHash, encryptionKey,
//! metadata}`. See §4.6.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::broadcast;

/// A paired client record as persisted in `clients.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairedClient {
    pub device_id: String,
    pub device_name: String,
    pub auth_token_hash: String,
    pub encryption_key: String,
    pub created_at: String,
    pub last_seen: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ClientsFile {
    #[serde(default)]
    clients: HashMap<String, PairedClient>,
}

struct Inner {
    path: PathBuf,
    clients: Mutex<HashMap<String, PairedClient>>,
    revoked: broadcast::Sender<String>,
}

/// Handle to the paired-device registry. Reads return snapshots; writes
/// (`add`/`revoke`/`touch`) persist atomically via the shared write-temp-
/// then-rename helper in [`crate::persist`].
#[derive(Clone)]
pub struct ClientRegistry {
    inner: Arc<Inner>,
}

impl ClientRegistry {
    pub fn load(base_dir: &Path) -> anyhow::Result<Self> {
        let path = clients_path(base_dir);
        let file: ClientsFile = crate::persist::load(&path)?.unwrap_or_default();
        let (revoked, _rx) = broadcast::channel(64);
        Ok(Self {
            inner: Arc::new(Inner { path, clients: Mutex::new(file.clients), revoked }),
        })
    }

    /// Subscribe to revocations; the Data transport uses this to close any
    /// socket bound to a device the moment it is revoked.
    pub fn subscribe_revocations(&self) -> broadcast::Receiver<String> {
        self.inner.revoked.subscribe()
    }

    pub fn list(&self) -> Vec<PairedClient> {
        let clients = self.inner.clients.lock().unwrap_or_else(|e| e.into_inner());
        clients.values().cloned().collect()
    }

    pub fn get(&self, device_id: &str) -> Option<PairedClient> {
        let clients = self.inner.clients.lock().unwrap_or_else(|e| e.into_inner());
        clients.get(device_id).cloned()
    }

    /// Hash `auth_token` and constant-time compare against the stored hash.
    pub fn validate(&self, device_id: &str, auth_token: &[u8]) -> bool {
        let Some(record) = self.get(device_id) else { return false };
        let Ok(expected) = hex::decode(&record.auth_token_hash) else { return false };
        let actual = Sha256::digest(auth_token);
        expected.ct_eq(&actual).into()
    }

    pub fn touch(&self, device_id: &str, now: &str) -> anyhow::Result<()> {
        let mut clients = self.inner.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = clients.get_mut(device_id) {
            record.last_seen = Some(now.to_string());
        }
        self.persist_locked(&clients)
    }

    pub fn add(&self, record: PairedClient) -> anyhow::Result<()> {
        let mut clients = self.inner.clients.lock().unwrap_or_else(|e| e.into_inner());
        clients.insert(record.device_id.clone(), record);
        self.persist_locked(&clients)
    }

    pub fn revoke(&self, device_id: &str) -> anyhow::Result<bool> {
        let removed = {
            let mut clients = self.inner.clients.lock().unwrap_or_else(|e| e.into_inner());
            let removed = clients.remove(device_id).is_some();
            self.persist_locked(&clients)?;
            removed
        };
        if removed {
            let _ = self.inner.revoked.send(device_id.to_string());
        }
        Ok(removed)
    }

    fn persist_locked(&self, clients: &HashMap<String, PairedClient>) -> anyhow::Result<()> {
        let file = ClientsFile { clients: clients.clone() };
        crate::persist::save_with_mode(&self.inner.path, &file, Some(0o600))
    }
}

fn clients_path(base_dir: &Path) -> PathBuf {
    base_dir.join("clients.json")
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
