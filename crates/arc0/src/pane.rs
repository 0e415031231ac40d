// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Abstract interface to the terminal multiplexer, plus a tmux-backed
//! implementation. See §4.14.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;

/// Opaque reference to a pane, returned by `findPaneByTty`/`createWindow` and
/// fed back into `sendText`/`sendKey`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PaneRef(pub String);

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The core's view of the terminal multiplexer. `sendText`/`sendKey` are
/// serialized per pane by the adapter itself (§5's per-pane lock); callers
/// don't need to coordinate.
pub trait PaneAdapter: Send + Sync {
    fn is_installed(&self) -> BoxFuture<'_, bool>;
    fn find_pane_by_tty<'a>(&'a self, tty: &'a str) -> BoxFuture<'a, Option<PaneRef>>;
    fn ensure_default_session(&self) -> BoxFuture<'_, anyhow::Result<String>>;
    fn create_window<'a>(&'a self, name: Option<&'a str>, cwd: &'a Path) -> BoxFuture<'a, anyhow::Result<PaneRef>>;
    fn send_text<'a>(&'a self, pane: &'a PaneRef, text: &'a str, press_enter: bool) -> BoxFuture<'a, bool>;
    fn send_key<'a>(&'a self, pane: &'a PaneRef, key_name: &'a str) -> BoxFuture<'a, bool>;
}

const DEFAULT_SESSION: &str = "arc0";

/// Real tmux backend. Every invocation is a `tokio::process::Command`;
/// per-pane serialization is a tail-chained [`tokio::sync::Mutex`] keyed by
/// [`PaneRef`].
pub struct TmuxPaneAdapter {
    locks: Mutex<HashMap<PaneRef, Arc<AsyncMutex<()>>>>,
}

impl Default for TmuxPaneAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl TmuxPaneAdapter {
    pub fn new() -> Self {
        Self { locks: Mutex::new(HashMap::new()) }
    }

    fn cmd() -> tokio::process::Command {
        tokio::process::Command::new("tmux")
    }

    fn pane_lock(&self, pane: &PaneRef) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(pane.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    async fn has_session(name: &str) -> bool {
        Self::cmd()
            .args(["has-session", "-t", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok_and(|s| s.success())
    }

    async fn ensure_default_session_impl() -> anyhow::Result<String> {
        if !Self::has_session(DEFAULT_SESSION).await {
            let status = Self::cmd().args(["new-session", "-d", "-s", DEFAULT_SESSION]).status().await?;
            if !status.success() {
                anyhow::bail!("failed to create tmux session '{DEFAULT_SESSION}'");
            }
        }
        Ok(DEFAULT_SESSION.to_string())
    }

    async fn create_window_impl(name: Option<&str>, cwd: &Path) -> anyhow::Result<PaneRef> {
        Self::ensure_default_session_impl().await?;

        let cwd_str = cwd.to_string_lossy().to_string();
        let mut args: Vec<&str> = vec!["new-window", "-P", "-t", DEFAULT_SESSION, "-c", &cwd_str];
        if let Some(name) = name {
            args.push("-n");
            args.push(name);
        }
        args.push("-F");
        args.push("#{session_name}:#{window_index}.#{pane_index}");

        let output = Self::cmd().args(&args).output().await?;
        if !output.status.success() {
            anyhow::bail!("tmux new-window failed");
        }
        let target = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(PaneRef(target))
    }

    async fn send_keys_raw(target: &str, args: &[&str]) -> bool {
        Self::cmd()
            .arg("send-keys")
            .args(args)
            .args(["-t", target])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok_and(|s| s.success())
    }
}

impl PaneAdapter for TmuxPaneAdapter {
    fn is_installed(&self) -> BoxFuture<'_, bool> {
        Box::pin(async {
            Self::cmd().arg("-V").stdout(Stdio::null()).stderr(Stdio::null()).status().await.is_ok_and(|s| s.success())
        })
    }

    fn find_pane_by_tty<'a>(&'a self, tty: &'a str) -> BoxFuture<'a, Option<PaneRef>> {
        Box::pin(async move {
            let output = Self::cmd()
                .args(["list-panes", "-a", "-F", "#{pane_tty} #{session_name}:#{window_index}.#{pane_index}"])
                .output()
                .await
                .ok()?;
            if !output.status.success() {
                return None;
            }
            let text = String::from_utf8_lossy(&output.stdout);
            for line in text.lines() {
                let (pane_tty, target) = line.split_once(' ')?;
                if pane_tty == tty {
                    return Some(PaneRef(target.to_string()));
                }
            }
            None
        })
    }

    fn ensure_default_session(&self) -> BoxFuture<'_, anyhow::Result<String>> {
        Box::pin(Self::ensure_default_session_impl())
    }

    fn create_window<'a>(&'a self, name: Option<&'a str>, cwd: &'a Path) -> BoxFuture<'a, anyhow::Result<PaneRef>> {
        Box::pin(Self::create_window_impl(name, cwd))
    }

    fn send_text<'a>(&'a self, pane: &'a PaneRef, text: &'a str, press_enter: bool) -> BoxFuture<'a, bool> {
        let lock = self.pane_lock(pane);
        Box::pin(async move {
            let _guard = lock.lock().await;
            if !Self::send_keys_raw(&pane.0, &["-l", text]).await {
                return false;
            }
            if press_enter {
                return Self::send_keys_raw(&pane.0, &["Enter"]).await;
            }
            true
        })
    }

    fn send_key<'a>(&'a self, pane: &'a PaneRef, key_name: &'a str) -> BoxFuture<'a, bool> {
        let lock = self.pane_lock(pane);
        Box::pin(async move {
            let _guard = lock.lock().await;
            Self::send_keys_raw(&pane.0, &[key_name]).await
        })
    }
}

/// In-memory test double: records every call, never touches a real process.
#[derive(Default)]
pub struct NullPane {
    installed: bool,
    panes_by_tty: Mutex<HashMap<String, PaneRef>>,
    pub sent_text: Mutex<Vec<(PaneRef, String, bool)>>,
    pub sent_keys: Mutex<Vec<(PaneRef, String)>>,
    next_window: Mutex<u32>,
}

impl NullPane {
    pub fn new(installed: bool) -> Self {
        Self { installed, ..Default::default() }
    }

    pub fn register_tty(&self, tty: &str, pane: PaneRef) {
        self.panes_by_tty.lock().unwrap_or_else(|e| e.into_inner()).insert(tty.to_string(), pane);
    }
}

impl PaneAdapter for NullPane {
    fn is_installed(&self) -> BoxFuture<'_, bool> {
        Box::pin(async { self.installed })
    }

    fn find_pane_by_tty<'a>(&'a self, tty: &'a str) -> BoxFuture<'a, Option<PaneRef>> {
        Box::pin(async move { self.panes_by_tty.lock().unwrap_or_else(|e| e.into_inner()).get(tty).cloned() })
    }

    fn ensure_default_session(&self) -> BoxFuture<'_, anyhow::Result<String>> {
        Box::pin(async { Ok(DEFAULT_SESSION.to_string()) })
    }

    fn create_window<'a>(&'a self, name: Option<&'a str>, _cwd: &'a Path) -> BoxFuture<'a, anyhow::Result<PaneRef>> {
        Box::pin(async move {
            let mut counter = self.next_window.lock().unwrap_or_else(|e| e.into_inner());
            *counter += 1;
            let label = name.map(str::to_string).unwrap_or_else(|| counter.to_string());
            Ok(PaneRef(format!("{DEFAULT_SESSION}:{label}.0")))
        })
    }

    fn send_text<'a>(&'a self, pane: &'a PaneRef, text: &'a str, press_enter: bool) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            self.sent_text.lock().unwrap_or_else(|e| e.into_inner()).push((pane.clone(), text.to_string(), press_enter));
            true
        })
    }

    fn send_key<'a>(&'a self, pane: &'a PaneRef, key_name: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            self.sent_keys.lock().unwrap_or_else(|e| e.into_inner()).push((pane.clone(), key_name.to_string()));
            true
        })
    }
}

/// `~`-expansion applied to `cwd` inputs before existence checks (§4.10).
pub fn expand_home(cwd: &str) -> PathBuf {
    if let Some(rest) = cwd.strip_prefix('~') {
        if let Some(home) = dirs_home() {
            return home.join(rest.trim_start_matches('/'));
        }
    }
    PathBuf::from(cwd)
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(test)]
#[path = "pane_tests.rs"]
mod tests;
