//! Agent runner integration tests
//!
//! A file follower driven end to end: offsets come from the checkpoint
//! context, events are written as JSON lines and offsets are persisted at
//! shutdown.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};

use tributary_agent::agent::{offset_agent_key, offset_key};
use tributary_agent::context::MemoryContext;
use tributary_agent::{
    build_source, create_source_registry, Agent, AgentConfig, AgentError, AgentSettings, Context,
    Event, SharedContext, SourceConfig, SourceStatus,
};

const WAIT: Duration = Duration::from_secs(5);

fn settings(standalone: bool) -> AgentSettings {
    AgentConfig::from_yaml(&format!(
        "agent: {{tenant: acme, environment: test, uuid: agent-1, standalone: {}, commit_interval_ms: 20}}",
        standalone
    ))
    .unwrap()
    .agent
}

fn follower_config(path: &Path) -> SourceConfig {
    serde_yaml::from_str(&format!(
        "type: fileReadingFollower\nconfig: {{path: '{}', poll_interval_ms: 10}}",
        path.display()
    ))
    .unwrap()
}

fn agent_with_follower(settings: AgentSettings, context: SharedContext, path: &Path) -> Agent {
    let registry = create_source_registry();
    let source = build_source("app-log", &follower_config(path), &settings, &registry).unwrap();
    let mut agent = Agent::new(settings, context);
    agent.add_source(source);
    agent
}

async fn wait_for_lines(out: &Mutex<Vec<u8>>, count: usize) -> Vec<Event> {
    tokio::time::timeout(WAIT, async {
        loop {
            {
                let buf = out.lock().await;
                let text = String::from_utf8_lossy(&buf);
                if text.lines().count() >= count {
                    return text
                        .lines()
                        .map(|line| serde_json::from_str::<Event>(line).unwrap())
                        .collect::<Vec<_>>();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for output")
}

#[tokio::test]
async fn test_supervised_run_resumes_and_persists_offsets() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    std::fs::write(&path, "a\nb\nc\n").unwrap();

    let context = Arc::new(MemoryContext::new());
    context.store(&offset_key("app-log"), "1").await.unwrap();
    context.store(&offset_agent_key("app-log"), "10").await.unwrap();

    let agent = agent_with_follower(settings(false), context.clone(), &path);
    let out = Arc::new(Mutex::new(Vec::new()));
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let runner = tokio::spawn(agent.run_with_output(
        async {
            let _ = stop_rx.await;
        },
        out.clone(),
    ));

    let events = wait_for_lines(&out, 2).await;
    assert_eq!(events[0].value(), Some("b"));
    assert_eq!(events[1].value(), Some("c"));
    assert_eq!(events[0].payload.tenant, "acme");
    assert_eq!(events[0].payload.agent_id, "agent-1");

    stop_tx.send(()).unwrap();
    tokio::time::timeout(WAIT, runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(
        context.load(&offset_key("app-log")).await.unwrap().as_deref(),
        Some("3")
    );
    assert_eq!(
        context
            .load(&offset_agent_key("app-log"))
            .await
            .unwrap()
            .as_deref(),
        Some("12")
    );
}

#[tokio::test]
async fn test_standalone_run_skips_handshake() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    std::fs::write(&path, "x\ny\n").unwrap();

    let context = Arc::new(MemoryContext::new());
    // ignored in standalone mode
    context.store(&offset_key("app-log"), "1").await.unwrap();

    let agent = agent_with_follower(settings(true), context.clone(), &path);
    let out = Arc::new(Mutex::new(Vec::new()));
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let runner = tokio::spawn(agent.run_with_output(
        async {
            let _ = stop_rx.await;
        },
        out.clone(),
    ));

    let events = wait_for_lines(&out, 2).await;
    assert_eq!(events[0].value(), Some("x"));

    stop_tx.send(()).unwrap();
    runner.await.unwrap().unwrap();
    assert_eq!(
        context.load(&offset_key("app-log")).await.unwrap().as_deref(),
        Some("2")
    );
}

#[tokio::test]
async fn test_corrupt_checkpoint_blocks_handshake() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    std::fs::write(&path, "a\n").unwrap();

    let context = Arc::new(MemoryContext::new());
    context
        .store(&offset_key("app-log"), "not-a-number")
        .await
        .unwrap();

    let agent = agent_with_follower(settings(false), context.clone(), &path);
    let err = agent.load_meta("app-log").await.unwrap_err();
    assert!(matches!(err, AgentError::Checkpoint(_)), "{err}");

    let source = agent.source("app-log").unwrap().clone();
    source.init().await.unwrap();
    assert!(agent.handshake(source.as_ref()).await.is_err());
    assert_eq!(source.status().await, SourceStatus::WaitingForMeta);

    // nothing to persist before a handshake, stored value untouched
    assert_eq!(agent.persist().await, 0);
    assert_eq!(
        context.load(&offset_key("app-log")).await.unwrap().as_deref(),
        Some("not-a-number")
    );
}

#[tokio::test]
async fn test_queued_events_are_not_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    std::fs::write(&path, "a\nb\nc\n").unwrap();

    let context = Arc::new(MemoryContext::new());
    context.store(&offset_key("app-log"), "0").await.unwrap();
    context.store(&offset_agent_key("app-log"), "7").await.unwrap();

    let agent = agent_with_follower(settings(false), context.clone(), &path);
    let source = agent.source("app-log").unwrap().clone();
    // nobody drains this channel
    let _events = source.take_output().unwrap();

    source.init().await.unwrap();
    agent.handshake(source.as_ref()).await.unwrap();
    source.start().await.unwrap();

    tokio::time::timeout(WAIT, async {
        while source.meta()["offset"] != serde_json::json!(3) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    // three lines enqueued, none written out: the handshake offsets stand
    assert_eq!(agent.persist().await, 1);
    assert_eq!(
        context.load(&offset_key("app-log")).await.unwrap().as_deref(),
        Some("0")
    );
    assert_eq!(
        context
            .load(&offset_agent_key("app-log"))
            .await
            .unwrap()
            .as_deref(),
        Some("7")
    );

    source.stop().await.unwrap();
}

#[tokio::test]
async fn test_never_stored_offsets_default_to_zero() {
    let dir = tempfile::tempdir().unwrap();
    let agent = agent_with_follower(
        settings(false),
        Arc::new(MemoryContext::new()),
        &dir.path().join("app.log"),
    );

    let meta = agent.load_meta("app-log").await.unwrap();
    assert_eq!((meta.offset, meta.offset_agent), (0, 0));
}

#[tokio::test]
async fn test_health_reports_failed_source() {
    let dir = tempfile::tempdir().unwrap();
    let agent = agent_with_follower(
        settings(true),
        Arc::new(MemoryContext::new()),
        &dir.path().join("missing.log"),
    );

    let source = agent.source("app-log").unwrap().clone();
    source.init().await.unwrap();
    source.start().await.unwrap();

    let report = tokio::time::timeout(WAIT, async {
        loop {
            let report = agent.health().await;
            if report[0].status == SourceStatus::Failed {
                return report;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(report[0].name, "app-log");
    assert!(!report[0].healthy);
}

#[tokio::test]
async fn test_from_config_skips_disabled_sources() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = format!(
        r#"
agent:
  tenant: acme
  environment: test
  checkpoint: "file://{dir}/offsets.json"
sources:
  app-log:
    type: fileReadingFollower
    config: {{path: "{dir}/app.log"}}
  old-log:
    type: fileReadingFollower
    enabled: false
    config: {{path: "{dir}/old.log"}}
"#,
        dir = dir.path().display()
    );
    let config = AgentConfig::from_yaml(&yaml).unwrap();
    let registry = create_source_registry();
    config.validate(&registry).unwrap();

    let agent = Agent::from_config(&config, &registry).unwrap();
    assert_eq!(agent.sources().len(), 1);
    assert!(agent.source("old-log").is_none());
    assert_eq!(
        agent.context().location(),
        format!("{}/offsets.json", dir.path().display())
    );
}
