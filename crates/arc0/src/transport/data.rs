// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Data transport: one process-wide WebSocket listener on port `D`,
//! serving the pairing plane, cursor-based catch-up, live fan-out, and the
//! four authenticated actions. See §4.7-§4.9.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use base64::Engine;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use arc0_crypto::EncryptionKey;

use crate::bus::{BusEvent, EventBus};
use crate::clock::unix_timestamp;
use crate::dispatch::{ApproveToolUseInput, Dispatcher, OpenSessionInput, SendPromptInput, StopAgentInput};
use crate::error::{ActionResult, ErrorCode};
use crate::events::SessionEventLog;
use crate::pairing::PairingCoordinator;
use crate::registry::client::ClientRegistry;
use crate::registry::session::{sessions_to_wire, SessionRegistry};
use crate::transcript::TranscriptWatcher;
use crate::transport::data_msg::{pair_error, ClientMessage, ServerMessage};
use crate::transport::queue::{Batch, OutboundQueue, Sink};

const PROTOCOL_VERSION: &str = "1.0";
const CATCHUP_ACK_TIMEOUT: Duration = Duration::from_secs(15);

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub socket_id: String,
    pub device_id: Option<String>,
    pub connected_at: String,
    pub last_ack_at: Option<String>,
}

/// Connected-socket snapshot backing `GET /api/clients`.
#[derive(Clone, Default)]
pub struct ConnectionTracker {
    inner: Arc<Mutex<HashMap<String, ConnectionInfo>>>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, info: ConnectionInfo) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(info.socket_id.clone(), info);
    }

    fn touch_ack(&self, socket_id: &str, now: &str) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(info) = map.get_mut(socket_id) {
            info.last_ack_at = Some(now.to_string());
        }
    }

    fn remove(&self, socket_id: &str) {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(socket_id);
    }

    pub fn list(&self) -> Vec<ConnectionInfo> {
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Everything a connection handler needs, shared across every socket.
#[derive(Clone)]
pub struct DataState {
    pub bus: EventBus,
    pub sessions: SessionRegistry,
    pub transcripts: TranscriptWatcher,
    pub clients: ClientRegistry,
    pub pairing: Arc<PairingCoordinator>,
    pub dispatcher: Arc<Dispatcher>,
    pub base_dir: PathBuf,
    pub workstation_id: String,
    pub connections: ConnectionTracker,
}

pub fn router(state: DataState) -> Router {
    Router::new().route("/", get(ws_handler)).with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HandshakeQuery {
    device_id: Option<String>,
    auth_token: Option<String>,
}

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

fn next_socket_id() -> String {
    format!("sock-{}", NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed))
}

async fn ws_handler(
    State(state): State<DataState>,
    Query(query): Query<HandshakeQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let socket_id = next_socket_id();
    ws.on_upgrade(move |socket| handle_connection(state, socket, socket_id, query))
}

/// Per-socket auth context, established once at handshake time (§4.7
/// middleware steps 1-2). Re-validated nowhere else: a socket's
/// authentication is fixed for its lifetime, matching the revocation-closes-
/// the-socket model in §4.6/§8 rather than a per-message re-check.
struct AuthContext {
    device_id: String,
    encryption_key: Arc<EncryptionKey>,
}

fn authenticate(clients: &ClientRegistry, query: &HandshakeQuery) -> Option<AuthContext> {
    let device_id = query.device_id.clone()?;
    let auth_token = query.auth_token.as_ref()?;
    let token_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(auth_token).ok()?;
    if !clients.validate(&device_id, &token_bytes) {
        return None;
    }
    let record = clients.get(&device_id)?;
    let key_bytes = base64::engine::general_purpose::STANDARD.decode(&record.encryption_key).ok()?;
    let key_bytes: [u8; 32] = key_bytes.try_into().ok()?;
    Some(AuthContext { device_id, encryption_key: Arc::new(EncryptionKey::new(&key_bytes)) })
}

struct ConnSink {
    ws_tx: Arc<tokio::sync::Mutex<SplitSink<WebSocket, Message>>>,
    encryption_key: Arc<EncryptionKey>,
}

impl Sink for ConnSink {
    fn send(&self, batch_id: &str, event: &str, payload: &Value) -> BoxFuture<'_, ()> {
        let batch_id = batch_id.to_string();
        let event = event.to_string();
        let payload = payload.clone();
        Box::pin(async move {
            let msg = match event.as_str() {
                "permission:request-as-message" => {
                    ServerMessage::PermissionRequestAsMessage { batch_id, payload }
                }
                _ => ServerMessage::Messages { batch_id, payload },
            };
            let frame = wire_frame(Some(&self.encryption_key), &msg);
            let _ = send_frame(&self.ws_tx, &frame).await;
        })
    }
}

fn wire_frame(key: Option<&EncryptionKey>, msg: &ServerMessage) -> Value {
    let Some(key) = key.filter(|_| !msg.is_plaintext()) else {
        return serde_json::to_value(msg).unwrap_or(Value::Null);
    };
    let bytes = serde_json::to_vec(msg).unwrap_or_default();
    let envelope = key.seal(&bytes);
    serde_json::to_value(&envelope).unwrap_or(Value::Null)
}

async fn send_frame(
    ws_tx: &Arc<tokio::sync::Mutex<SplitSink<WebSocket, Message>>>,
    frame: &Value,
) -> Result<(), axum::Error> {
    let text = frame.to_string();
    let mut tx = ws_tx.lock().await;
    tx.send(Message::Text(text.into())).await
}

/// Detect an AEAD-envelope-shaped value and open it; pass plaintext through
/// unchanged (§4.7's "either plain JSON or an AEAD envelope" tolerance).
fn maybe_decrypt(payload: &Value, key: Option<&EncryptionKey>) -> Result<Value, ErrorCode> {
    let looks_like_envelope = payload
        .as_object()
        .is_some_and(|o| o.contains_key("v") && o.contains_key("nonce") && o.contains_key("ciphertext"));

    if !looks_like_envelope {
        return Ok(payload.clone());
    }
    let Some(key) = key else { return Err(ErrorCode::DecryptError) };
    let envelope: arc0_crypto::Envelope =
        serde_json::from_value(payload.clone()).map_err(|_| ErrorCode::DecryptError)?;
    let plaintext = key.open(&envelope).map_err(|_| ErrorCode::DecryptError)?;
    serde_json::from_slice(&plaintext).map_err(|_| ErrorCode::DecryptError)
}

/// Build the §4.9.4 merged catch-up item list for one session: transcript
/// lines after `cursor_ts` plus at most one pending permission request,
/// ascending by timestamp with transcripts ordered first on a tie.
fn merge_catchup_items(
    session_id: &str,
    cursor_ts: &str,
    transcripts: &TranscriptWatcher,
    base_dir: &std::path::Path,
) -> Vec<Value> {
    let mut merged: Vec<(String, Value)> = transcripts
        .get_lines_since(session_id, cursor_ts)
        .into_iter()
        .map(|line| (line.timestamp.clone(), line.raw))
        .collect();

    if let Some(event) = SessionEventLog::new(base_dir, session_id).latest_pending_request() {
        merged.push((
            event.timestamp.clone(),
            serde_json::json!({
                "type": "permission_request",
                "toolUseId": event.tool_use_id,
                "toolName": event.tool_name,
                "timestamp": event.timestamp,
                "payload": event.payload,
            }),
        ));
    }

    merged.sort_by(|a, b| a.0.cmp(&b.0));
    merged
        .into_iter()
        .map(|(_, payload)| serde_json::json!({"sessionId": session_id, "payload": payload}))
        .collect()
}

async fn handle_connection(state: DataState, socket: WebSocket, socket_id: String, query: HandshakeQuery) {
    let auth = authenticate(&state.clients, &query);
    let connected_at = unix_timestamp();

    state.connections.insert(ConnectionInfo {
        socket_id: socket_id.clone(),
        device_id: auth.as_ref().map(|a| a.device_id.clone()),
        connected_at,
        last_ack_at: None,
    });
    if let Some(auth) = &auth {
        let _ = state.clients.touch(&auth.device_id, &unix_timestamp());
    }

    let (ws_tx, mut ws_rx) = socket.split();
    let ws_tx = Arc::new(tokio::sync::Mutex::new(ws_tx));

    let queue = auth.as_ref().map(|a| {
        OutboundQueue::new(Arc::new(ConnSink { ws_tx: Arc::clone(&ws_tx), encryption_key: Arc::clone(&a.encryption_key) }))
    });
    let encryption_key = auth.as_ref().map(|a| Arc::clone(&a.encryption_key));
    let device_id = auth.as_ref().map(|a| a.device_id.clone());

    let mut bus_rx = state.bus.subscribe();
    let mut revoked_rx = state.clients.subscribe_revocations();

    loop {
        tokio::select! {
            event = bus_rx.recv() => {
                let Ok(event) = event else { continue };
                handle_bus_event(&state, &ws_tx, queue.as_ref(), encryption_key.as_deref(), event).await;
            }
            revoked = revoked_rx.recv() => {
                let Ok(revoked_id) = revoked else { continue };
                if device_id.as_deref() == Some(revoked_id.as_str()) {
                    break;
                }
            }
            msg = ws_rx.next() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        if !handle_client_text(
                            &state,
                            &ws_tx,
                            queue.as_ref(),
                            encryption_key.as_deref(),
                            &device_id,
                            &socket_id,
                            &text,
                        )
                        .await
                        {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    if let Some(queue) = &queue {
        queue.on_disconnect();
    }
    state.connections.remove(&socket_id);
}

async fn handle_bus_event(
    state: &DataState,
    ws_tx: &Arc<tokio::sync::Mutex<SplitSink<WebSocket, Message>>>,
    queue: Option<&OutboundQueue>,
    encryption_key: Option<&EncryptionKey>,
    event: BusEvent,
) {
    let Some(queue) = queue else { return };

    match event {
        BusEvent::MessagesNew { session_id, lines } => {
            for line in lines {
                let payload = serde_json::json!({"sessionId": session_id, "payload": line.raw});
                queue.enqueue(Batch::new(uuid::Uuid::new_v4().to_string(), "messages", payload));
            }
        }
        BusEvent::PermissionRequest { session_id, event } => {
            let payload = serde_json::json!({
                "sessionId": session_id,
                "payload": {
                    "type": "permission_request",
                    "toolUseId": event.tool_use_id,
                    "toolName": event.tool_name,
                    "timestamp": event.timestamp,
                    "payload": event.payload,
                },
            });
            queue.enqueue(Batch::new(
                uuid::Uuid::new_v4().to_string(),
                "permission:request-as-message",
                payload,
            ));
        }
        BusEvent::SessionsChange(sessions) => {
            let wire_sessions = sessions_to_wire(&sessions, state.dispatcher.pane().as_ref()).await;
            let payload = serde_json::to_value(&wire_sessions).unwrap_or(Value::Null);
            let msg = ServerMessage::Sessions { payload };
            let frame = wire_frame(encryption_key, &msg);
            let _ = send_frame(ws_tx, &frame).await;
        }
        BusEvent::SessionStart(_) | BusEvent::SessionEnd { .. } => {}
    }
}

/// Returns `false` when the connection should close.
#[allow(clippy::too_many_arguments)]
async fn handle_client_text(
    state: &DataState,
    ws_tx: &Arc<tokio::sync::Mutex<SplitSink<WebSocket, Message>>>,
    queue: Option<&OutboundQueue>,
    encryption_key: Option<&EncryptionKey>,
    device_id: &Option<String>,
    socket_id: &str,
    text: &str,
) -> bool {
    let parsed: Result<ClientMessage, _> = serde_json::from_str(text);
    let Ok(client_msg) = parsed else {
        debug!(socket_id, "ignoring malformed client frame");
        return true;
    };

    match client_msg {
        ClientMessage::PairInit { device_id: new_device_id, device_name, spake2_message } => {
            let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(&spake2_message) else {
                let frame = wire_frame(None, &pair_error(ErrorCode::InvalidPayload, "bad spake2Message"));
                let _ = send_frame(ws_tx, &frame).await;
                return true;
            };
            let Ok(client_message): Result<[u8; 32], _> = decoded.try_into() else {
                let frame = wire_frame(None, &pair_error(ErrorCode::InvalidPayload, "bad spake2Message length"));
                let _ = send_frame(ws_tx, &frame).await;
                return true;
            };
            match state.pairing.handle_pair_init(new_device_id, device_name, client_message) {
                Ok(result) => {
                    let spake2_message = base64::engine::general_purpose::STANDARD.encode(result.server_message);
                    let frame = wire_frame(None, &ServerMessage::PairChallenge { spake2_message });
                    let _ = send_frame(ws_tx, &frame).await;
                }
                Err(code) => {
                    let frame = wire_frame(None, &pair_error(code, code.to_string()));
                    let _ = send_frame(ws_tx, &frame).await;
                }
            }
            true
        }
        ClientMessage::PairConfirm { mac } => {
            let Ok(mac_bytes) = base64::engine::general_purpose::STANDARD.decode(&mac) else {
                let frame = wire_frame(None, &pair_error(ErrorCode::InvalidPayload, "bad mac"));
                let _ = send_frame(ws_tx, &frame).await;
                return true;
            };
            match state.pairing.handle_pair_confirm(&mac_bytes, &state.clients, &unix_timestamp()) {
                Ok(result) => {
                    let msg = ServerMessage::PairComplete {
                        mac: base64::engine::general_purpose::STANDARD.encode(result.server_mac),
                        workstation_id: result.workstation_id,
                        workstation_name: result.workstation_name,
                        auth_token: arc0_crypto::token::encode_token(&result.auth_token),
                        encryption_key: base64::engine::general_purpose::STANDARD.encode(result.encryption_key),
                    };
                    let frame = wire_frame(None, &msg);
                    let _ = send_frame(ws_tx, &frame).await;
                }
                Err(code) => {
                    let frame = wire_frame(None, &pair_error(code, code.to_string()));
                    let _ = send_frame(ws_tx, &frame).await;
                }
            }
            true
        }
        ClientMessage::Init { device_id: init_device_id, protocol_version, cursor } => {
            if device_id.as_deref() != Some(init_device_id.as_str()) {
                debug!(socket_id, "init on an unauthenticated or mismatched socket, closing");
                return false;
            }
            if protocol_version != PROTOCOL_VERSION {
                let frame = wire_frame(
                    encryption_key,
                    &ServerMessage::ProtocolError {
                        code: ErrorCode::ProtocolMismatch.as_str().to_string(),
                        expected: PROTOCOL_VERSION.to_string(),
                        received: protocol_version,
                    },
                );
                let _ = send_frame(ws_tx, &frame).await;
                return false;
            }

            run_catchup(state, ws_tx, queue, encryption_key, &cursor).await;
            true
        }
        ClientMessage::Ping { id } => {
            let frame = wire_frame(encryption_key, &ServerMessage::Pong { id });
            let _ = send_frame(ws_tx, &frame).await;
            true
        }
        ClientMessage::Ack { batch_id } => {
            if let Some(queue) = queue {
                queue.ack(&batch_id);
                state.connections.touch_ack(socket_id, &unix_timestamp());
            }
            true
        }
        ClientMessage::OpenSession { request_id, payload } => {
            let result = decode_action_input::<OpenSessionInput>(encryption_key, payload);
            let result = match result {
                Ok(input) => state.dispatcher.open_session(input).await,
                Err(result) => result,
            };
            reply_action_result(ws_tx, encryption_key, request_id, result).await;
            true
        }
        ClientMessage::SendPrompt { request_id, payload } => {
            let result = decode_action_input::<SendPromptInput>(encryption_key, payload);
            let result = match result {
                Ok(input) => state.dispatcher.send_prompt(input).await,
                Err(result) => result,
            };
            reply_action_result(ws_tx, encryption_key, request_id, result).await;
            true
        }
        ClientMessage::StopAgent { request_id, payload } => {
            let result = decode_action_input::<StopAgentInput>(encryption_key, payload);
            let result = match result {
                Ok(input) => state.dispatcher.stop_agent(input).await,
                Err(result) => result,
            };
            reply_action_result(ws_tx, encryption_key, request_id, result).await;
            true
        }
        ClientMessage::ApproveToolUse { request_id, payload } => {
            let result = decode_action_input::<ApproveToolUseInput>(encryption_key, payload);
            let result = match result {
                Ok(input) => state.dispatcher.approve_tool_use(input).await,
                Err(result) => result,
            };
            reply_action_result(ws_tx, encryption_key, request_id, result).await;
            true
        }
    }
}

/// Shared decrypt→parse path for every action: requires an authenticated
/// (keyed) socket, tolerates plain or AEAD-wrapped `payload` (§4.7), and
/// validates against `I`'s shape before the caller ever touches the pane.
fn decode_action_input<I: serde::de::DeserializeOwned>(
    encryption_key: Option<&EncryptionKey>,
    payload: Value,
) -> Result<I, ActionResult> {
    let Some(encryption_key) = encryption_key else {
        return Err(ActionResult::error(ErrorCode::Unauthorized, "not authenticated"));
    };
    let value = maybe_decrypt(&payload, Some(encryption_key))
        .map_err(|code| ActionResult::error(code, "decryption failed"))?;
    serde_json::from_value::<I>(value).map_err(|_| ActionResult::error(ErrorCode::InvalidPayload, "invalid action payload"))
}

async fn reply_action_result(
    ws_tx: &Arc<tokio::sync::Mutex<SplitSink<WebSocket, Message>>>,
    encryption_key: Option<&EncryptionKey>,
    request_id: String,
    result: ActionResult,
) {
    let msg = ServerMessage::ActionResult { request_id, result };
    let frame = wire_frame(encryption_key, &msg);
    let _ = send_frame(ws_tx, &frame).await;
}

async fn run_catchup(
    state: &DataState,
    ws_tx: &Arc<tokio::sync::Mutex<SplitSink<WebSocket, Message>>>,
    queue: Option<&OutboundQueue>,
    encryption_key: Option<&EncryptionKey>,
    cursor: &[crate::transport::data_msg::CursorEntry],
) {
    let sessions = state.sessions.get_active_sessions();
    let wire_sessions = sessions_to_wire(&sessions, state.dispatcher.pane().as_ref()).await;
    let sessions_payload = serde_json::to_value(&wire_sessions).unwrap_or(Value::Null);
    let sessions_frame = wire_frame(encryption_key, &ServerMessage::Sessions { payload: sessions_payload });
    let _ = send_frame(ws_tx, &sessions_frame).await;

    let projects_frame = wire_frame(encryption_key, &ServerMessage::Projects { payload: serde_json::json!([]) });
    let _ = send_frame(ws_tx, &projects_frame).await;

    let Some(queue) = queue else { return };

    let mut cursors: HashMap<String, String> = HashMap::new();
    for entry in cursor {
        if let Some(ts) = &entry.last_message_ts {
            cursors.insert(entry.session_id.clone(), ts.clone());
        }
    }

    for session in sessions {
        let cursor_ts = cursors.get(&session.session_id).cloned().unwrap_or_default();
        let items = merge_catchup_items(&session.session_id, &cursor_ts, &state.transcripts, &state.base_dir);
        if items.is_empty() {
            continue;
        }

        let payload = serde_json::json!({
            "workstationId": state.workstation_id,
            "items": items,
        });
        let (batch, waiter) = Batch::new(uuid::Uuid::new_v4().to_string(), "messages", payload).with_waiter();
        queue.enqueue(batch);

        if tokio::time::timeout(CATCHUP_ACK_TIMEOUT, waiter).await.is_err() {
            warn!(session_id = %session.session_id, "catch-up ack timed out, moving to next session");
        }
    }
}

#[cfg(test)]
#[path = "data_tests.rs"]
mod tests;
