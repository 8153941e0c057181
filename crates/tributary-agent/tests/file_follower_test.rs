//! File follower integration tests

use serde_json::json;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;

use tributary_agent::source::{FileFollower, FileFollowerConfig, FILE_FOLLOWER_TYPE};
use tributary_agent::{
    Action, AgentInfo, ConnectorError, Event, Meta, Source, SourceBase, SourceStatus,
};

const WAIT: Duration = Duration::from_secs(5);

fn follower(path: &Path, standalone: bool) -> FileFollower {
    let base = SourceBase::new(
        "app-log",
        AgentInfo::new("acme", "test", "agent-1"),
        standalone,
        64,
    );
    FileFollower::new(
        base,
        FileFollowerConfig {
            path: path.to_string_lossy().into_owned(),
            offset: 0,
            poll_interval_ms: 10,
        },
    )
}

fn append(path: &Path, text: &str) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.sync_all().unwrap();
}

async fn next_line(events: &mut Receiver<Event>) -> String {
    let event = tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("output channel closed");
    assert_eq!(event.event_type(), FILE_FOLLOWER_TYPE);
    event.value().unwrap().to_string()
}

async fn wait_for_status(source: &FileFollower, expected: SourceStatus) {
    tokio::time::timeout(WAIT, async {
        while source.status().await != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("status never reached");
}

#[tokio::test]
async fn test_resume_from_meta_offset() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    append(&path, "one\ntwo\nthree\n");

    let source = follower(&path, false);
    let mut events = source.take_output().unwrap();
    source.init().await.unwrap();
    assert_eq!(source.status().await, SourceStatus::WaitingForMeta);
    assert!(source.meta().is_empty());

    source
        .process("SourceMeta", br#"{"data":{"offset":"1","offset_agent":"40"}}"#)
        .await
        .unwrap();
    source.start().await.unwrap();

    assert_eq!(next_line(&mut events).await, "two");
    assert_eq!(next_line(&mut events).await, "three");
    assert_eq!(source.meta()["offset"], json!(3));
    assert_eq!(source.meta()["offset_agent"], json!(42));

    source.stop().await.unwrap();
}

#[tokio::test]
async fn test_file_shorter_than_offset_is_read_from_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    // replaced while the agent was down: two lines, stored offset five
    append(&path, "fresh-1\nfresh-2\n");

    let source = follower(&path, false);
    let mut events = source.take_output().unwrap();
    source.init().await.unwrap();
    source
        .handle(Action::SourceMeta(Meta::new(5, 50)))
        .await
        .unwrap();
    source.start().await.unwrap();

    assert_eq!(next_line(&mut events).await, "fresh-1");
    assert_eq!(next_line(&mut events).await, "fresh-2");
    append(&path, "fresh-3\n");
    assert_eq!(next_line(&mut events).await, "fresh-3");

    // offsets keep counting from the stored values
    assert_eq!(source.meta()["offset"], json!(8));
    assert_eq!(source.meta()["offset_agent"], json!(53));

    source.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_waits_for_reader() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    append(&path, "a\n");

    let source = follower(&path, true);
    let mut events = source.take_output().unwrap();
    source.init().await.unwrap();
    source.start().await.unwrap();
    assert_eq!(next_line(&mut events).await, "a");

    tokio::time::timeout(WAIT, source.stop())
        .await
        .unwrap()
        .unwrap();

    // the reader is gone: later lines never reach the channel
    append(&path, "b\n");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err());
    assert_eq!(source.meta()["offset"], json!(1));
}

#[tokio::test]
async fn test_start_waits_for_handshake() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    append(&path, "first\n");

    let source = std::sync::Arc::new(follower(&path, false));
    let mut events = source.take_output().unwrap();
    source.init().await.unwrap();

    let starter = {
        let source = source.clone();
        tokio::spawn(async move { source.start().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!starter.is_finished());
    assert!(events.try_recv().is_err());

    source
        .handle(Action::SourceMeta(Meta::new(0, 0)))
        .await
        .unwrap();
    starter.await.unwrap().unwrap();
    assert_eq!(next_line(&mut events).await, "first");

    source.stop().await.unwrap();
}

#[tokio::test]
async fn test_follows_appended_lines_and_holds_partial_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    append(&path, "");

    let source = follower(&path, true);
    let mut events = source.take_output().unwrap();
    source.init().await.unwrap();
    source.start().await.unwrap();

    append(&path, "hello\r\npar");
    assert_eq!(next_line(&mut events).await, "hello");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err());

    append(&path, "tial\n");
    assert_eq!(next_line(&mut events).await, "partial");
    assert_eq!(source.meta()["offset"], json!(2));

    source.stop().await.unwrap();
    assert_eq!(source.status().await, SourceStatus::Stopped);
}

#[tokio::test]
async fn test_truncation_restarts_from_beginning() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    append(&path, "alpha\nbeta\n");

    let source = follower(&path, true);
    let mut events = source.take_output().unwrap();
    source.init().await.unwrap();
    source.start().await.unwrap();

    assert_eq!(next_line(&mut events).await, "alpha");
    assert_eq!(next_line(&mut events).await, "beta");

    std::fs::write(&path, "x\n").unwrap();
    assert_eq!(next_line(&mut events).await, "x");
    // offset keeps counting across truncation
    assert_eq!(source.meta()["offset"], json!(3));

    source.stop().await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_rotation_reopens_new_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    append(&path, "old-1\n");

    let source = follower(&path, true);
    let mut events = source.take_output().unwrap();
    source.init().await.unwrap();
    source.start().await.unwrap();
    assert_eq!(next_line(&mut events).await, "old-1");

    append(&path, "old-tail");
    tokio::time::sleep(Duration::from_millis(50)).await;
    std::fs::rename(&path, dir.path().join("app.log.1")).unwrap();
    append(&path, "new-1\nnew-2\n");

    assert_eq!(next_line(&mut events).await, "old-tail");
    assert_eq!(next_line(&mut events).await, "new-1");
    assert_eq!(next_line(&mut events).await, "new-2");

    source.stop().await.unwrap();
}

#[tokio::test]
async fn test_missing_file_fails_source() {
    let dir = tempfile::tempdir().unwrap();
    let source = follower(&dir.path().join("absent.log"), true);

    source.init().await.unwrap();
    source.start().await.unwrap();
    wait_for_status(&source, SourceStatus::Failed).await;
    assert!(!source.health_check().await);
}

#[tokio::test]
async fn test_stop_before_handshake_releases_start() {
    let dir = tempfile::tempdir().unwrap();
    let source = std::sync::Arc::new(follower(&dir.path().join("app.log"), false));
    source.init().await.unwrap();

    let starter = {
        let source = source.clone();
        tokio::spawn(async move { source.start().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    source.stop().await.unwrap();

    let result = tokio::time::timeout(WAIT, starter).await.unwrap().unwrap();
    assert!(matches!(result, Err(ConnectorError::Stopped)));
}

#[tokio::test]
async fn test_file_follower_rejects_queries() {
    let dir = tempfile::tempdir().unwrap();
    let source = follower(&dir.path().join("app.log"), true);

    let err = source
        .process("SourceQuery", br#"{"query":"SELECT 1"}"#)
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::UnsupportedAction(name) if name == "SourceQuery"));
    assert!(source.available_actions().is_empty());
    assert_eq!(source.schema(), json!("String"));
}
