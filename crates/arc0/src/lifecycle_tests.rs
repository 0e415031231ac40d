#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Write as _;

use fs2::FileExt;
use tempfile::tempdir;

use super::*;

fn test_config(base_dir: &Path) -> Config {
    Config {
        base_dir: Some(base_dir.to_path_buf()),
        dev: false,
        control_port: None,
        data_port: None,
        log_format: "text".to_string(),
        log_level: "error".to_string(),
    }
}

#[test]
fn acquire_lock_succeeds_and_writes_the_current_pid() {
    let dir = tempdir().expect("tempdir");
    let lock = acquire_lock(dir.path()).expect("lock");
    let pid = read_lock_pid(&lock_path(dir.path())).expect("pid");
    assert_eq!(pid, std::process::id());
    drop(lock);
}

#[test]
fn acquire_lock_fails_when_the_holder_pid_is_still_alive() {
    let dir = tempdir().expect("tempdir");
    std::fs::create_dir_all(dir.path()).expect("mkdir");
    let path = lock_path(dir.path());

    let held = OpenOptions::new().write(true).create(true).truncate(false).open(&path).expect("open");
    held.try_lock_exclusive().expect("lock");
    writeln!(&held, "{}", std::process::id()).expect("write pid");

    let result = acquire_lock(dir.path());
    match result {
        Err(LifecycleError::LockHeld(pid)) => assert_eq!(pid, std::process::id()),
        other => panic!("expected LockHeld, got {other:?}"),
    }
    drop(held);
}

#[test]
fn pid_is_alive_reports_true_for_the_current_process() {
    assert!(pid_is_alive(std::process::id()));
}

#[test]
fn pid_is_alive_reports_false_for_an_exited_child() {
    let mut child = std::process::Command::new("true").spawn().expect("spawn true");
    let pid = child.id();
    child.wait().expect("wait");
    assert!(!pid_is_alive(pid));
}

#[test]
fn ensure_secrets_generates_once_and_persists_across_calls() {
    let dir = tempdir().expect("tempdir");
    let first = ensure_secrets(dir.path()).expect("first");
    let second = ensure_secrets(dir.path()).expect("second");
    assert_eq!(first.secret, second.secret);

    let meta = std::fs::metadata(credentials_path(dir.path())).expect("metadata");
    use std::os::unix::fs::PermissionsExt;
    assert_eq!(meta.permissions().mode() & 0o777, 0o600);
}

#[test]
fn state_file_persists_data_port_under_the_socket_port_key() {
    let dir = tempdir().expect("tempdir");
    write_state_file(dir.path(), 4001, 4002).expect("write state");
    let raw = std::fs::read_to_string(state_path(dir.path())).expect("read");
    let value: serde_json::Value = serde_json::from_str(&raw).expect("parse");
    assert_eq!(value["controlPort"], serde_json::json!(4001));
    assert_eq!(value["socketPort"], serde_json::json!(4002));
    assert!(value.get("dataPort").is_none());
}

#[tokio::test]
async fn bind_preferred_falls_back_when_the_port_is_taken() {
    let taken = TcpListener::bind(("127.0.0.1", 0)).await.expect("bind");
    let port = taken.local_addr().expect("addr").port();

    let listener = bind_preferred(Some(port), "test").await.expect("bind_preferred");
    assert_ne!(listener.local_addr().expect("addr").port(), port);
}

#[tokio::test]
async fn bind_preferred_with_no_preference_gets_an_os_assigned_port() {
    let listener = bind_preferred(None, "test").await.expect("bind");
    assert_ne!(listener.local_addr().expect("addr").port(), 0);
}

#[tokio::test]
async fn start_writes_state_file_and_shutdown_removes_it() {
    let dir = tempdir().expect("tempdir");
    let daemon = start(test_config(dir.path())).await.expect("start");
    assert_ne!(daemon.control_port, 0);
    assert_ne!(daemon.data_port, 0);
    assert_ne!(daemon.control_port, daemon.data_port);

    let state_file = dir.path().join("daemon.state.json");
    assert!(state_file.exists());

    daemon.shutdown().await;
    assert!(!state_file.exists());
}

#[tokio::test]
async fn start_twice_on_the_same_base_dir_fails_the_second_time() {
    let dir = tempdir().expect("tempdir");
    let first = start(test_config(dir.path())).await.expect("first start");

    let result = start(test_config(dir.path())).await;
    assert!(result.is_err());

    first.shutdown().await;
}
