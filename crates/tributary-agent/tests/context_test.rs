//! Checkpoint context integration tests

use tributary_agent::{new_context, Context, ContextKind};

#[tokio::test]
async fn test_file_context_shared_by_concurrent_sources() {
    let dir = tempfile::tempdir().unwrap();
    let dsn = format!("file://{}/state/offsets.json", dir.path().display());
    let context = new_context(&dsn).unwrap();
    assert_eq!(context.kind(), ContextKind::File);

    let mut writers = Vec::new();
    for source in 0..8 {
        let context = context.clone();
        writers.push(tokio::spawn(async move {
            for offset in 1..=5 {
                context
                    .store(&format!("source-{}.offset", source), &offset.to_string())
                    .await
                    .unwrap();
            }
        }));
    }
    for writer in writers {
        writer.await.unwrap();
    }

    for source in 0..8 {
        assert_eq!(
            context
                .load(&format!("source-{}.offset", source))
                .await
                .unwrap()
                .as_deref(),
            Some("5")
        );
    }

    // a fresh context over the same location sees the persisted record
    let reopened = new_context(&dsn).unwrap();
    assert_eq!(
        reopened.load("source-3.offset").await.unwrap().as_deref(),
        Some("5")
    );
    assert_eq!(reopened.load("source-9.offset").await.unwrap(), None);
}

#[tokio::test]
async fn test_plain_path_selects_file_backend() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offsets");
    let context = new_context(&path.display().to_string()).unwrap();

    assert_eq!(context.kind(), ContextKind::File);
    context.store("app-log.offset", "7").await.unwrap();
    assert!(path.exists());
}

#[test]
fn test_kv_scheme_selects_kv_backend() {
    let context = new_context("kv://cache.internal:6379/agents/eu").unwrap();
    assert_eq!(context.kind(), ContextKind::Kv);
    assert!(context.location().ends_with("/agents/eu"), "{}", context.location());
}
