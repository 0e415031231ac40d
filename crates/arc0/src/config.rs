// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-level configuration (CLI flags / env vars) and the persisted
//! `config.json` the daemon reads and writes across restarts.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Process-level overrides, parsed from CLI flags with env-var fallback.
#[derive(Debug, Parser)]
#[command(name = "arc0d", version, about = "Bridges local coding agents to a paired client.")]
pub struct Config {
    /// Base directory for persisted state. Defaults to a per-mode dir under
    /// the user's home directory (`.arc0`, or `.arc0-dev` with `--dev`).
    #[arg(long, env = "ARC0_BASE_DIR")]
    pub base_dir: Option<PathBuf>,

    /// Use the dev state directory (`.arc0-dev`) instead of `.arc0`.
    #[arg(long, env = "ARC0_DEV")]
    pub dev: bool,

    /// Preferred Control-plane port; falls back to an OS-assigned port.
    #[arg(long, env = "ARC0_CONTROL_PORT")]
    pub control_port: Option<u16>,

    /// Preferred Data-transport port; falls back to an OS-assigned port.
    #[arg(long, env = "ARC0_DATA_PORT")]
    pub data_port: Option<u16>,

    /// Log format (json or text).
    #[arg(long, env = "ARC0_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "ARC0_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate flag combinations after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if let (Some(c), Some(d)) = (self.control_port, self.data_port) {
            if c == d {
                anyhow::bail!("--control-port and --data-port must differ");
            }
        }
        Ok(())
    }

    /// Resolve the base directory per §6: `.arc0` in production, `.arc0-dev`
    /// under `--dev`, overridable explicitly via `--base-dir` (used by the
    /// test harness to pass `.arc0-test`).
    pub fn resolve_base_dir(&self) -> anyhow::Result<PathBuf> {
        if let Some(ref dir) = self.base_dir {
            return Ok(dir.clone());
        }
        let home = dirs_home()?;
        let name = if self.dev { ".arc0-dev" } else { ".arc0" };
        Ok(home.join(name))
    }
}

fn dirs_home() -> anyhow::Result<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("could not determine home directory"))
}

/// Which providers the daemon watches for live sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnabledProviders {
    #[serde(default = "default_true")]
    pub claude: bool,
    #[serde(default = "default_true")]
    pub codex: bool,
    #[serde(default = "default_true")]
    pub gemini: bool,
}

fn default_true() -> bool {
    true
}

impl Default for EnabledProviders {
    fn default() -> Self {
        Self { claude: true, codex: true, gemini: true }
    }
}

/// Tunnel launch mode, persisted alongside the rest of the config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelConfig {
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<String>,
}

/// Persisted port choices, remembered across restarts so a reconnecting
/// tunnel or client sees a stable port whenever the OS allows reuse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortPreferences {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_port: Option<u16>,
}

const CONFIG_VERSION: u32 = 1;

/// The `config.json` file under the base dir: `{version, workstationId,
/// enabledProviders, watchPaths, tunnel?, portPreferences?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedConfig {
    pub version: u32,
    pub workstation_id: String,
    #[serde(default = "default_workstation_name")]
    pub workstation_name: String,
    #[serde(default)]
    pub enabled_providers: EnabledProviders,
    #[serde(default)]
    pub watch_paths: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel: Option<TunnelConfig>,
    #[serde(default)]
    pub port_preferences: PortPreferences,
}

impl PersistedConfig {
    /// Load `config.json` from `base_dir`, creating it with a freshly
    /// generated `workstationId` on first run (no setup wizard exists to
    /// prompt for one; see DESIGN.md).
    pub fn load_or_init(base_dir: &Path) -> anyhow::Result<Self> {
        let path = config_path(base_dir);
        if let Some(existing) = crate::persist::load::<Self>(&path)? {
            return Ok(existing);
        }

        let fresh = Self {
            version: CONFIG_VERSION,
            workstation_id: uuid::Uuid::new_v4().to_string(),
            workstation_name: default_workstation_name(),
            enabled_providers: EnabledProviders::default(),
            watch_paths: Vec::new(),
            tunnel: None,
            port_preferences: PortPreferences::default(),
        };
        crate::persist::save(&path, &fresh)?;
        Ok(fresh)
    }

    pub fn save(&self, base_dir: &Path) -> anyhow::Result<()> {
        crate::persist::save(&config_path(base_dir), self)
    }
}

fn default_workstation_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "workstation".to_string())
}

fn config_path(base_dir: &Path) -> PathBuf {
    base_dir.join("config.json")
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
