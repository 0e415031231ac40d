// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The localhost-only Control HTTP plane (§4.11): daemon status, the
//! connected-client and active-session snapshots, and the pairing and
//! tunnel lifecycle endpoints. Bound to `127.0.0.1` only by the caller;
//! never reachable through the tunnel.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;

use crate::error::{ActionResult, ErrorCode};
use crate::pairing::PairingCoordinator;
use crate::pane::PaneAdapter;
use crate::registry::client::ClientRegistry;
use crate::registry::session::{sessions_to_wire, SessionRegistry};
use crate::transport::data::ConnectionTracker;

/// Invoked by `POST /api/tunnel/stop`. Returns whether a tunnel was actually
/// running to stop.
pub type TunnelStopFn = Arc<dyn Fn() -> bool + Send + Sync>;

#[derive(Clone)]
pub struct ControlState {
    pub started_at: Instant,
    pub connections: ConnectionTracker,
    pub sessions: SessionRegistry,
    /// Unused directly by any handler today, but kept alongside
    /// `connections`/`sessions` since a future endpoint (revocation) will
    /// need it from the same state bag.
    pub clients: ClientRegistry,
    pub pairing: Arc<PairingCoordinator>,
    pub tunnel_stop: Option<TunnelStopFn>,
    pub pane: Arc<dyn PaneAdapter>,
}

pub fn router(state: ControlState) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/clients", get(clients))
        .route("/api/sessions", get(sessions))
        .route("/api/pairing/start", post(pairing_start))
        .route("/api/pairing/status", get(pairing_status))
        .route("/api/pairing/cancel", post(pairing_cancel))
        .route("/api/tunnel/stop", post(tunnel_stop))
        .with_state(state)
}

fn error_response(code: ErrorCode) -> Response {
    let status = StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ActionResult::error(code, code.to_string()))).into_response()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    running: bool,
    uptime: u64,
    client_count: usize,
    session_count: usize,
}

async fn status(State(state): State<ControlState>) -> impl IntoResponse {
    Json(StatusResponse {
        running: true,
        uptime: state.started_at.elapsed().as_secs(),
        client_count: state.connections.count(),
        session_count: state.sessions.get_active_sessions().len(),
    })
}

async fn clients(State(state): State<ControlState>) -> impl IntoResponse {
    Json(state.connections.list())
}

async fn sessions(State(state): State<ControlState>) -> impl IntoResponse {
    let sessions = state.sessions.get_active_sessions();
    Json(sessions_to_wire(&sessions, state.pane.as_ref()).await)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PairingStartResponse {
    code: String,
    formatted_code: String,
    expires_in: u64,
}

async fn pairing_start(State(state): State<ControlState>) -> Response {
    match state.pairing.start() {
        Ok(start) => {
            let expires_in = start.expires_at.saturating_duration_since(Instant::now()).as_secs();
            Json(PairingStartResponse { code: start.code, formatted_code: start.formatted_code, expires_in })
                .into_response()
        }
        Err(code) => error_response(code),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PairingStatusResponse {
    active: bool,
    code: Option<String>,
    remaining_ms: Option<u64>,
    completed: bool,
    device_id: Option<String>,
    device_name: Option<String>,
}

async fn pairing_status(State(state): State<ControlState>) -> impl IntoResponse {
    let status = state.pairing.status();
    Json(PairingStatusResponse {
        active: status.active,
        code: status.code,
        remaining_ms: status.remaining_ms,
        completed: status.completed,
        device_id: status.device_id,
        device_name: status.device_name,
    })
}

async fn pairing_cancel(State(state): State<ControlState>) -> impl IntoResponse {
    state.pairing.cancel();
    Json(ActionResult::Success)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TunnelStopResponse {
    stopped: bool,
}

async fn tunnel_stop(State(state): State<ControlState>) -> impl IntoResponse {
    let stopped = state.tunnel_stop.as_ref().map(|stop| stop()).unwrap_or(false);
    Json(TunnelStopResponse { stopped })
}

#[cfg(test)]
#[path = "control_tests.rs"]
mod tests;
