#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use super::*;
use std::io::Write;
use std::time::Duration;
use tempfile::tempdir;

async fn next_messages(rx: &mut tokio::sync::broadcast::Receiver<BusEvent>) -> (String, Vec<TranscriptLine>) {
    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("recv");
    match event {
        BusEvent::MessagesNew { session_id, lines } => (session_id, lines),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn tails_lines_appended_to_an_existing_file() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("session.jsonl");
    std::fs::write(&path, "{\"timestamp\":\"2024-01-01T00:00:01Z\"}\n").expect("write");

    let bus = EventBus::new();
    let mut rx = bus.subscribe();
    let watcher = TranscriptWatcher::new(bus);
    watcher.watch_session("s1".to_string(), path.clone());

    let (session_id, lines) = next_messages(&mut rx).await;
    assert_eq!(session_id, "s1");
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].timestamp, "2024-01-01T00:00:01Z");

    let mut file = std::fs::OpenOptions::new().append(true).open(&path).expect("open");
    writeln!(file, "{{\"timestamp\":\"2024-01-01T00:00:02Z\"}}").expect("write");

    let (_session_id, lines) = next_messages(&mut rx).await;
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].timestamp, "2024-01-01T00:00:02Z");

    watcher.unwatch_session("s1");
}

#[tokio::test]
async fn deferred_attachment_catches_lines_after_parent_dir_is_created_later() {
    let dir = tempdir().expect("tempdir");
    let nested = dir.path().join("project").join("sessions");
    let path = nested.join("session.jsonl");

    let bus = EventBus::new();
    let mut rx = bus.subscribe();
    let watcher = TranscriptWatcher::new(bus);
    watcher.watch_session("s1".to_string(), path.clone());

    // Parent directory does not exist yet; create it and the file after a
    // short delay to exercise the ancestor-watch promotion path.
    tokio::time::sleep(Duration::from_millis(50)).await;
    std::fs::create_dir_all(&nested).expect("mkdir");
    std::fs::write(&path, "{\"timestamp\":\"2024-02-02T00:00:01Z\"}\n").expect("write");

    let (session_id, lines) = next_messages(&mut rx).await;
    assert_eq!(session_id, "s1");
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].timestamp, "2024-02-02T00:00:01Z");

    watcher.unwatch_session("s1");
}

#[tokio::test]
async fn get_lines_since_filters_by_timestamp() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("session.jsonl");
    std::fs::write(
        &path,
        "{\"timestamp\":\"2024-01-01T00:00:01Z\"}\n{\"timestamp\":\"2024-01-01T00:00:02Z\"}\n",
    )
    .expect("write");

    let bus = EventBus::new();
    let mut rx = bus.subscribe();
    let watcher = TranscriptWatcher::new(bus);
    watcher.watch_session("s1".to_string(), path);
    let _ = next_messages(&mut rx).await;

    let since = watcher.get_lines_since("s1", "2024-01-01T00:00:01Z");
    assert_eq!(since.len(), 1);
    assert_eq!(since[0].timestamp, "2024-01-01T00:00:02Z");

    let all = watcher.get_lines_since("s1", "");
    assert_eq!(all.len(), 2);
}

#[test]
fn invalid_json_lines_are_skipped_without_erroring() {
    assert!(TranscriptLine::parse("not json").is_none());
    assert!(TranscriptLine::parse("{\"timestamp\":\"t\"}").is_some());
}

#[test]
fn nearest_existing_ancestor_walks_up_to_an_existing_dir() {
    let dir = tempdir().expect("tempdir");
    let missing = dir.path().join("a").join("b").join("c");
    assert_eq!(nearest_existing_ancestor(&missing), dir.path());
}
