//! End-to-end tests over real SSE connections.

use std::sync::Arc;
use std::time::Duration;

use streamledger::assets::{AssetDispatcher, AssetSlot, HttpAssetFetcher};
use streamledger::storage::{LocalStore, MemoryStore, SessionStore};
use streamledger::{
    ConversationEngine, Credentials, Error, EventSourceTransport, LifecycleOutcome, Role,
    StaticCredentials, StreamState,
};
use tempfile::TempDir;

mod common;
use common::{GOOD_TOKEN, PNG_BYTES, TestServer, credentials, spawn_server};

fn engine(server: &TestServer, store: Arc<dyn SessionStore>) -> ConversationEngine {
    ConversationEngine::open(
        &server.config(),
        store,
        Arc::new(EventSourceTransport::new()),
        credentials(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_answer_streams_to_completion() {
    let server = spawn_server().await;
    let mut engine = engine(&server, Arc::new(MemoryStore::new()));
    engine.mount().unwrap();

    let item = engine.send("hello").unwrap();
    engine.drive().await.unwrap();

    assert_eq!(engine.state(), &StreamState::Completed);
    let items = engine.items();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].role, Role::User);
    assert_eq!(items[1].id, item.id);
    assert_eq!(items[1].content, "Hi!");
    assert!(items[1].completed);

    let requests = server.recorded.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["question"], "hello");
    assert_eq!(requests[0]["user_id"], "u-1");
    assert_eq!(requests[0]["token"], GOOD_TOKEN);
    assert!(!requests[0].contains_key("continue"));
}

#[tokio::test]
async fn test_dropped_stream_resumes_into_same_item() {
    let server = spawn_server().await;
    let mut engine = engine(&server, Arc::new(MemoryStore::new()));
    engine.mount().unwrap();

    let item = engine.send("drop").unwrap();
    let err = engine.drive().await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));
    assert!(matches!(engine.state(), StreamState::Failed { .. }));
    assert_eq!(engine.items()[1].content, "partial");
    assert!(!engine.items()[1].completed);

    let resumed = engine.resume().unwrap();
    assert_eq!(resumed.id, item.id);
    engine.drive().await.unwrap();

    assert_eq!(engine.items().len(), 2);
    assert_eq!(engine.items()[1].content, "partial-resumed");
    assert!(engine.items()[1].completed);

    let requests = server.recorded.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1]["continue"], "true");
    assert_eq!(requests[1]["question"], "drop");
}

#[tokio::test]
async fn test_server_error_event_leaves_item_incomplete() {
    let server = spawn_server().await;
    let mut engine = engine(&server, Arc::new(MemoryStore::new()));

    engine.send("fail").unwrap();
    let err = engine.drive().await.unwrap_err();
    match err {
        Error::ServerSignaled(reason) => assert_eq!(reason, "model overloaded"),
        other => panic!("Expected ServerSignaled, got {:?}", other),
    }
    assert_eq!(engine.items()[1].content, "x");
    assert!(engine.items()[1].is_in_flight());
}

#[tokio::test]
async fn test_rejected_token_is_transport_failure() {
    let server = spawn_server().await;
    let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
    let mut engine = ConversationEngine::open(
        &server.config(),
        store,
        Arc::new(EventSourceTransport::new()),
        Arc::new(StaticCredentials::new(Credentials::new("expired", "u-1"))),
    )
    .unwrap();

    engine.send("hello").unwrap();
    let err = engine.drive().await.unwrap_err();
    match err {
        Error::Transport(reason) => assert!(reason.contains("401"), "reason: {reason}"),
        other => panic!("Expected Transport, got {:?}", other),
    }
    assert!(engine.items()[1].is_in_flight());
}

#[tokio::test]
async fn test_reload_resumes_from_durable_store() {
    let server = spawn_server().await;
    let dir = TempDir::new().unwrap();

    let first_id = {
        let mut engine = engine(&server, Arc::new(LocalStore::new(dir.path())));
        engine.mount().unwrap();
        let item = engine.send("drop").unwrap();
        assert!(engine.drive().await.is_err());
        item.id
    };

    let mut reloaded = engine(&server, Arc::new(LocalStore::new(dir.path())));
    assert_eq!(reloaded.items()[1].content, "partial");
    let outcome = reloaded.mount().unwrap();
    assert_eq!(
        outcome,
        LifecycleOutcome::Resumed {
            item_id: first_id.clone()
        }
    );
    reloaded.drive().await.unwrap();

    assert_eq!(reloaded.stage(), 0);
    assert_eq!(reloaded.items()[1].id, first_id);
    assert_eq!(reloaded.items()[1].content, "partial-resumed");
    assert!(reloaded.items()[1].completed);
    assert_eq!(server.recorded.requests()[1]["continue"], "true");
}

#[tokio::test]
async fn test_document_feed_dedups_and_fetches_assets() {
    let server = spawn_server().await;
    let config = server.config();
    let fetcher = HttpAssetFetcher::new(config.assets.endpoint.clone());
    let mut engine = engine(&server, Arc::new(MemoryStore::new()))
        .with_assets(AssetDispatcher::new(Arc::new(fetcher)));

    engine.load_document("todo 7").unwrap();
    engine.drive().await.unwrap();

    let ids: Vec<&str> = engine.documents().iter().map(|i| i.id.as_str()).collect();
    assert_eq!(ids, vec!["todo 7-1", "todo 7-2"]);
    assert!(engine.documents().iter().all(|i| i.completed));
    assert_eq!(engine.documents()[0].assets, vec!["chart.png"]);
    assert!(engine.items().is_empty());

    let cache = engine.assets().unwrap().clone();
    let slot = tokio::time::timeout(Duration::from_secs(5), async move {
        loop {
            match cache.get("chart.png") {
                Some(AssetSlot::Pending { .. }) | None => {
                    tokio::time::sleep(Duration::from_millis(10)).await
                }
                Some(slot) => return slot,
            }
        }
    })
    .await
    .unwrap();
    match slot {
        AssetSlot::Ready(handle) => {
            assert_eq!(handle.bytes.as_ref(), PNG_BYTES);
            assert_eq!(handle.content_type.as_deref(), Some("image/png"));
        }
        other => panic!("Expected Ready, got {:?}", other),
    }
}
