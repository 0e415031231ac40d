// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use arc0_crypto::{ConfirmLabel, EncryptionKey, Envelope, Role, Spake2};
use base64::engine::general_purpose::{STANDARD as B64, URL_SAFE_NO_PAD as B64_URL};
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use arc0_specs::{control_url, data_ws_url, data_ws_url_unauthenticated, Arc0Process};

const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(url: &str) -> WsStream {
    let (ws, _) = connect_async(url).await.expect("connect to data transport");
    ws
}

async fn send_json(ws: &mut WsStream, value: &Value) {
    ws.send(Message::Text(value.to_string().into())).await.expect("send frame");
}

/// Waits for the next text frame and parses it as JSON, skipping any
/// non-text control frames the socket happens to send first.
async fn recv_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a server frame")
            .expect("socket closed before sending a frame")
            .expect("websocket transport error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).expect("frame is valid json"),
            Message::Close(_) => panic!("socket closed instead of replying"),
            _ => continue,
        }
    }
}

async fn recv_closed(ws: &mut WsStream) {
    loop {
        let next = tokio::time::timeout(RECV_TIMEOUT, ws.next()).await.expect("timed out waiting for close");
        match next {
            None => return,
            Some(Ok(Message::Close(_))) => return,
            Some(Ok(_)) => continue,
            Some(Err(_)) => return,
        }
    }
}

fn decrypt(key: &EncryptionKey, frame: &Value) -> Value {
    let envelope: Envelope = serde_json::from_value(frame.clone()).expect("frame is an aead envelope");
    let plaintext = key.open(&envelope).expect("envelope decrypts under the derived key");
    serde_json::from_slice(&plaintext).expect("plaintext is valid json")
}

/// Runs the full `pair:init` / `pair:confirm` handshake against a freshly
/// started daemon's pairing code, returning the derived auth token (already
/// base64url-encoded) and encryption key alongside the assigned device id.
async fn pair(control_port: u16, data_port: u16, device_id: &str) -> (String, EncryptionKey) {
    let client = reqwest::Client::new();
    let start: Value = client
        .post(control_url(control_port, "/api/pairing/start"))
        .send()
        .await
        .expect("pairing start request")
        .json()
        .await
        .expect("pairing start response is json");
    let code = start["code"].as_str().expect("code field").to_string();

    let mut ws = connect(&data_ws_url_unauthenticated(data_port)).await;

    let (client_state, client_msg) = Spake2::start(Role::Client, &code);
    send_json(
        &mut ws,
        &json!({
            "event": "pair:init",
            "deviceId": device_id,
            "deviceName": "integration-test-device",
            "spake2Message": B64.encode(client_msg),
        }),
    )
    .await;

    let challenge = recv_json(&mut ws).await;
    assert_eq!(challenge["event"], "pair:challenge");
    let server_msg_bytes: [u8; 32] = B64
        .decode(challenge["spake2Message"].as_str().expect("spake2Message"))
        .expect("valid base64")
        .try_into()
        .expect("server message is 32 bytes");

    let shared = client_state.finish(&server_msg_bytes).expect("spake2 exchange completes");
    let client_mac = shared.client_confirm().expect("client confirm mac");
    send_json(&mut ws, &json!({"event": "pair:confirm", "mac": B64.encode(client_mac)})).await;

    let complete = recv_json(&mut ws).await;
    assert_eq!(complete["event"], "pair:complete");
    let server_mac = B64.decode(complete["mac"].as_str().expect("mac")).expect("valid base64");
    shared.verify(ConfirmLabel::Server, &server_mac).expect("server confirms the same transcript");

    let auth_token = complete["authToken"].as_str().expect("authToken").to_string();
    let encryption_key_bytes: [u8; 32] = B64
        .decode(complete["encryptionKey"].as_str().expect("encryptionKey"))
        .expect("valid base64")
        .try_into()
        .expect("encryption key is 32 bytes");

    (auth_token, EncryptionKey::new(&encryption_key_bytes))
}

#[tokio::test]
async fn status_endpoint_reports_an_idle_daemon() {
    let daemon = Arc0Process::start().expect("spawn arc0d");
    let state = daemon.wait_state(STARTUP_TIMEOUT).await.expect("daemon.state.json appears");

    let status: Value = reqwest::get(control_url(state.control_port, "/api/status"))
        .await
        .expect("status request")
        .json()
        .await
        .expect("status response is json");

    assert_eq!(status["running"], true);
    assert_eq!(status["clientCount"], 0);
    assert_eq!(status["sessionCount"], 0);
}

#[tokio::test]
async fn a_second_daemon_on_the_same_base_dir_is_refused_the_lock() {
    let base_dir = tempfile::tempdir().expect("tempdir");
    let first = Arc0Process::build().base_dir(base_dir.path()).spawn().expect("spawn first arc0d");
    first.wait_state(STARTUP_TIMEOUT).await.expect("first daemon comes up");

    let mut second = Arc0Process::build().base_dir(base_dir.path()).spawn().expect("spawn second arc0d");
    let status = second.wait_exit(STARTUP_TIMEOUT).await.expect("second daemon exits");
    assert!(!status.success(), "second daemon should refuse to start while the first holds the lock");
}

#[tokio::test]
async fn ping_pong_works_without_authentication() {
    let daemon = Arc0Process::start().expect("spawn arc0d");
    let state = daemon.wait_state(STARTUP_TIMEOUT).await.expect("daemon.state.json appears");

    let mut ws = connect(&data_ws_url_unauthenticated(state.data_port)).await;
    send_json(&mut ws, &json!({"event": "ping", "id": "ping-1"})).await;

    let pong = recv_json(&mut ws).await;
    assert_eq!(pong["event"], "pong");
    assert_eq!(pong["id"], "ping-1");
}

#[tokio::test]
async fn init_on_an_unauthenticated_socket_is_rejected() {
    let daemon = Arc0Process::start().expect("spawn arc0d");
    let state = daemon.wait_state(STARTUP_TIMEOUT).await.expect("daemon.state.json appears");

    let mut ws = connect(&data_ws_url_unauthenticated(state.data_port)).await;
    send_json(
        &mut ws,
        &json!({"event": "init", "deviceId": "no-such-device", "protocolVersion": "1.0", "cursor": []}),
    )
    .await;

    recv_closed(&mut ws).await;
}

#[tokio::test]
async fn pairing_then_init_yields_a_working_authenticated_session() {
    let daemon = Arc0Process::start().expect("spawn arc0d");
    let state = daemon.wait_state(STARTUP_TIMEOUT).await.expect("daemon.state.json appears");

    let device_id = "integration-test-phone";
    let (auth_token, encryption_key) = pair(state.control_port, state.data_port, device_id).await;

    let mut ws = connect(&data_ws_url(state.data_port, device_id, &auth_token)).await;
    send_json(
        &mut ws,
        &json!({"event": "init", "deviceId": device_id, "protocolVersion": "1.0", "cursor": []}),
    )
    .await;

    let sessions_frame = recv_json(&mut ws).await;
    let sessions = decrypt(&encryption_key, &sessions_frame);
    assert_eq!(sessions["event"], "sessions");
    assert!(sessions["payload"].as_array().expect("sessions payload is an array").is_empty());

    let projects_frame = recv_json(&mut ws).await;
    let projects = decrypt(&encryption_key, &projects_frame);
    assert_eq!(projects["event"], "projects");
}

#[tokio::test]
async fn a_stale_auth_token_is_refused_at_handshake() {
    let daemon = Arc0Process::start().expect("spawn arc0d");
    let state = daemon.wait_state(STARTUP_TIMEOUT).await.expect("daemon.state.json appears");

    let bogus_token = B64_URL.encode([7u8; 32]);
    let mut ws = connect(&data_ws_url(state.data_port, "never-paired-device", &bogus_token)).await;
    send_json(
        &mut ws,
        &json!({"event": "init", "deviceId": "never-paired-device", "protocolVersion": "1.0", "cursor": []}),
    )
    .await;

    recv_closed(&mut ws).await;
}

#[tokio::test]
async fn a_protocol_version_mismatch_is_reported_and_closes_the_socket() {
    let daemon = Arc0Process::start().expect("spawn arc0d");
    let state = daemon.wait_state(STARTUP_TIMEOUT).await.expect("daemon.state.json appears");

    let device_id = "integration-test-version-skew";
    let (auth_token, _encryption_key) = pair(state.control_port, state.data_port, device_id).await;

    let mut ws = connect(&data_ws_url(state.data_port, device_id, &auth_token)).await;
    send_json(
        &mut ws,
        &json!({"event": "init", "deviceId": device_id, "protocolVersion": "0.1", "cursor": []}),
    )
    .await;

    let error = recv_json(&mut ws).await;
    assert_eq!(error["event"], "protocol:error");
    assert_eq!(error["expected"], "1.0");
    assert_eq!(error["received"], "0.1");

    recv_closed(&mut ws).await;
}

#[tokio::test]
async fn pairing_status_reflects_the_completed_handshake() {
    let daemon = Arc0Process::start().expect("spawn arc0d");
    let state = daemon.wait_state(STARTUP_TIMEOUT).await.expect("daemon.state.json appears");

    let _ = pair(state.control_port, state.data_port, "integration-test-status-check").await;

    let status: Value = reqwest::get(control_url(state.control_port, "/api/pairing/status"))
        .await
        .expect("pairing status request")
        .json()
        .await
        .expect("pairing status response is json");

    assert_eq!(status["completed"], true);
    assert_eq!(status["deviceId"], "integration-test-status-check");
}

#[tokio::test]
async fn tunnel_stop_without_a_configured_tunnel_reports_nothing_to_stop() {
    let daemon = Arc0Process::start().expect("spawn arc0d");
    let state = daemon.wait_state(STARTUP_TIMEOUT).await.expect("daemon.state.json appears");

    let client = reqwest::Client::new();
    let response: Value = client
        .post(control_url(state.control_port, "/api/tunnel/stop"))
        .send()
        .await
        .expect("tunnel stop request")
        .json()
        .await
        .expect("tunnel stop response is json");

    assert_eq!(response["stopped"], false);
}
