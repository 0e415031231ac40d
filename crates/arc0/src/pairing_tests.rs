#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use arc0_crypto::{Role, Spake2};
use tempfile::tempdir;

fn registry() -> ClientRegistry {
    let dir = tempdir().expect("tempdir");
    ClientRegistry::load(dir.path()).expect("load")
}

fn drive_full_pairing(coordinator: &PairingCoordinator, registry: &ClientRegistry) -> PairConfirmResult {
    let start = coordinator.start().expect("start");

    let (client_state, client_message) = Spake2::start(Role::Client, &start.code);
    let init = coordinator
        .handle_pair_init("device-1".to_string(), "Phone".to_string(), client_message)
        .expect("handle_pair_init");

    let shared = client_state.finish(&init.server_message).expect("client finish");
    let client_mac = shared.client_confirm().expect("client confirm mac");

    coordinator
        .handle_pair_confirm(&client_mac, registry, "2024-01-01T00:00:00Z")
        .expect("handle_pair_confirm")
}

#[test]
fn start_rejects_a_concurrent_attempt() {
    let coordinator = PairingCoordinator::new("ws1".to_string(), "My Desk".to_string());
    coordinator.start().expect("first start");
    assert_eq!(coordinator.start().unwrap_err(), ErrorCode::AlreadyPaired);
}

#[test]
fn full_handshake_inserts_a_paired_client_and_reports_completed() {
    let coordinator = PairingCoordinator::new("ws1".to_string(), "My Desk".to_string());
    let reg = registry();

    let result = drive_full_pairing(&coordinator, &reg);
    assert_eq!(result.workstation_id, "ws1");
    assert!(reg.get("device-1").is_some());

    let status = coordinator.status();
    assert!(!status.active);
    assert!(status.completed);
    assert_eq!(status.device_id.as_deref(), Some("device-1"));

    // completed latch is one-shot
    let status_again = coordinator.status();
    assert!(!status_again.completed);
}

#[test]
fn mismatched_confirm_mac_keeps_the_code_valid() {
    let coordinator = PairingCoordinator::new("ws1".to_string(), "My Desk".to_string());
    let reg = registry();
    let start = coordinator.start().expect("start");

    let (_client_state, client_message) = Spake2::start(Role::Client, &start.code);
    coordinator
        .handle_pair_init("device-1".to_string(), "Phone".to_string(), client_message)
        .expect("handle_pair_init");

    let err = coordinator
        .handle_pair_confirm(&[0u8; 32], &reg, "2024-01-01T00:00:00Z")
        .unwrap_err();
    assert_eq!(err, ErrorCode::MacMismatch);

    let status = coordinator.status();
    assert!(status.active);
    assert!(status.code.is_some());
}

#[test]
fn cancel_resets_to_idle() {
    let coordinator = PairingCoordinator::new("ws1".to_string(), "My Desk".to_string());
    coordinator.start().expect("start");
    coordinator.cancel();
    assert!(!coordinator.status().active);
    coordinator.start().expect("start again after cancel");
}

#[tokio::test]
async fn expired_attempt_returns_to_idle() {
    let coordinator = PairingCoordinator::with_expiry(
        "ws1".to_string(),
        "My Desk".to_string(),
        std::time::Duration::from_millis(10),
    );
    coordinator.start().expect("start");
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(!coordinator.status().active);
}
