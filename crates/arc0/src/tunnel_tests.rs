#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::*;

fn sleeper() -> Command {
    let mut command = Command::new("sleep");
    command.arg("30");
    command
}

#[tokio::test]
async fn spawn_command_reports_not_found_binaries_as_none() {
    let bogus = Command::new("there-is-no-such-arc0-tunnel-binary");
    let result = TunnelSupervisor::spawn_command(bogus, CancellationToken::new());
    assert!(result.is_none());
}

#[tokio::test]
async fn a_running_tunnel_reports_running_status() {
    let supervisor = TunnelSupervisor::spawn_command(sleeper(), CancellationToken::new()).expect("spawn sleep");
    assert_eq!(supervisor.status(), TunnelState::Running);
}

#[tokio::test]
async fn stop_fn_kills_the_child_and_flips_to_stopped() {
    let supervisor = TunnelSupervisor::spawn_command(sleeper(), CancellationToken::new()).expect("spawn sleep");
    let stop = supervisor.stop_fn();

    assert!(stop());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(supervisor.status(), TunnelState::Stopped);
}

#[tokio::test]
async fn shutdown_token_kills_the_child_too() {
    let shutdown = CancellationToken::new();
    let supervisor = TunnelSupervisor::spawn_command(sleeper(), shutdown.clone()).expect("spawn sleep");

    shutdown.cancel();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(supervisor.status(), TunnelState::Stopped);
}

#[tokio::test]
async fn stop_fn_after_the_watch_task_already_finished_reports_no_effect() {
    // A process that exits on its own (no --local-port args needed for `true`
    // as a stand-in tunnel binary) drives the watch loop to `Exited` before
    // anyone calls stop.
    let supervisor = TunnelSupervisor::spawn_command(Command::new("true"), CancellationToken::new()).expect("spawn true");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(supervisor.status(), TunnelState::Exited);

    // The watch task has already returned, so the stop channel's receiver is
    // gone; sending should report failure rather than panic or hang.
    let stop = supervisor.stop_fn();
    assert!(!stop());
}
