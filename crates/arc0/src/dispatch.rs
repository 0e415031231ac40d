// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Action dispatcher: one ack-returning handler per client action. See §4.10.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ActionResult, ErrorCode};
use crate::pane::{expand_home, PaneAdapter, PaneRef};
use crate::registry::session::{Provider, SessionRegistry};

/// Delay between writing prompt text and pressing Enter, giving the agent
/// CLI's own input handling time to settle.
const ENTER_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenSessionInput {
    pub provider: Provider,
    pub name: Option<String>,
    pub cwd: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendPromptInput {
    pub session_id: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopAgentInput {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ToolResponse {
    /// `{kind:"tool", optionIndex}` — answer a tool-use prompt by digit.
    Tool { option_index: u32 },
    /// `{kind:"plan", approve}` — approve or reject a plan (`y`/`n` then Enter).
    Plan { approve: bool },
    /// `{kind:"answers", text}` — free-text answer followed by Enter.
    Answers { text: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveToolUseInput {
    pub session_id: String,
    pub tool_use_id: String,
    pub tool_name: String,
    pub response: ToolResponse,
}

pub struct Dispatcher {
    sessions: SessionRegistry,
    pane: Arc<dyn PaneAdapter>,
}

impl Dispatcher {
    pub fn new(sessions: SessionRegistry, pane: Arc<dyn PaneAdapter>) -> Self {
        Self { sessions, pane }
    }

    /// Exposes the pane adapter for callers outside the dispatcher that also
    /// need to compute pane-derived session fields (e.g. mapping sessions to
    /// their wire shape for catch-up and live fan-out).
    pub fn pane(&self) -> &Arc<dyn PaneAdapter> {
        &self.pane
    }

    pub async fn open_session(&self, input: OpenSessionInput) -> ActionResult {
        let cwd = expand_home(&input.cwd);
        if !cwd.is_dir() {
            return ActionResult::error(ErrorCode::InvalidCwd, format!("{} is not a directory", cwd.display()));
        }

        let command = provider_command(input.provider);
        if !command_on_path(command).await {
            return ActionResult::error(ErrorCode::ProviderNotFound, format!("{command} is not on PATH"));
        }

        if !self.pane.is_installed().await {
            return ActionResult::error(ErrorCode::TmuxNotInstalled, "tmux is not installed");
        }

        if let Err(e) = self.pane.ensure_default_session().await {
            return ActionResult::error(ErrorCode::SessionCreateFailed, e.to_string());
        }

        let pane_ref = match self.pane.create_window(input.name.as_deref(), &cwd).await {
            Ok(p) => p,
            Err(e) => return ActionResult::error(ErrorCode::SessionCreateFailed, e.to_string()),
        };

        if !self.pane.send_text(&pane_ref, command, true).await {
            return ActionResult::error(ErrorCode::SessionCreateFailed, "failed to launch provider CLI in pane");
        }

        ActionResult::Success
    }

    pub async fn send_prompt(&self, input: SendPromptInput) -> ActionResult {
        let pane_ref = match self.locate_pane(&input.session_id).await {
            Ok(p) => p,
            Err(result) => return result,
        };

        if !self.pane.send_text(&pane_ref, &input.text, false).await {
            return ActionResult::error(ErrorCode::PaneNotFound, "send_text failed");
        }
        tokio::time::sleep(ENTER_DELAY).await;
        if !self.pane.send_key(&pane_ref, "Enter").await {
            return ActionResult::error(ErrorCode::PaneNotFound, "send_key(Enter) failed");
        }
        ActionResult::Success
    }

    pub async fn stop_agent(&self, input: StopAgentInput) -> ActionResult {
        let pane_ref = match self.locate_pane(&input.session_id).await {
            Ok(p) => p,
            Err(result) => return result,
        };
        if !self.pane.send_key(&pane_ref, "Escape").await {
            return ActionResult::error(ErrorCode::PaneNotFound, "send_key(Escape) failed");
        }
        ActionResult::Success
    }

    pub async fn approve_tool_use(&self, input: ApproveToolUseInput) -> ActionResult {
        let pane_ref = match self.locate_pane(&input.session_id).await {
            Ok(p) => p,
            Err(result) => return result,
        };

        let ok = match input.response {
            ToolResponse::Tool { option_index } => {
                self.pane.send_text(&pane_ref, &option_index.to_string(), true).await
            }
            ToolResponse::Plan { approve } => {
                self.pane.send_text(&pane_ref, if approve { "y" } else { "n" }, true).await
            }
            ToolResponse::Answers { text } => self.pane.send_text(&pane_ref, &text, true).await,
        };

        if !ok {
            return ActionResult::error(ErrorCode::PaneNotFound, "failed to deliver tool-use response");
        }
        ActionResult::Success
    }

    async fn locate_pane(&self, session_id: &str) -> Result<PaneRef, ActionResult> {
        let Some(session) = self.sessions.get(session_id) else {
            return Err(ActionResult::error(ErrorCode::SessionNotFound, "unknown sessionId"));
        };
        let Some(tty) = session.tty else {
            return Err(ActionResult::error(ErrorCode::PaneNotFound, "session has no tty"));
        };
        self.pane
            .find_pane_by_tty(&tty)
            .await
            .ok_or_else(|| ActionResult::error(ErrorCode::PaneNotFound, "no pane bound to session tty"))
    }
}

fn provider_command(provider: Provider) -> &'static str {
    match provider {
        Provider::Claude => "claude",
        Provider::Codex => "codex",
        Provider::Gemini => "gemini",
    }
}

async fn command_on_path(command: &str) -> bool {
    tokio::process::Command::new("which")
        .arg(command)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .is_ok_and(|s| s.success())
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
