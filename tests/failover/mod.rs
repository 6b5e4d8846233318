use std::time::Duration;

use feedwatch::OperationKind;
use feedwatch::TaskBuilder;
use feedwatch::TokenInfo;
use feedwatch::TokenStore;
use serde_json::json;

use crate::common::db1;
use crate::common::wait_until;
use crate::common::watch_config;
use crate::common::Cluster;
use crate::common::RecordingHandler;
use crate::common::WAIT;
use crate::enable_logger;

/// leader -> follower -> leader: events appended while paused are handled
/// after the flip back, nothing twice
#[tokio::test]
async fn test_leadership_flip_resumes_from_committed_tokens() {
    enable_logger();
    let cluster = Cluster::new();
    let handler = RecordingHandler::new();
    let mut scheduler = cluster.scheduler(watch_config());
    scheduler
        .add_tasks([TaskBuilder::new("cache").collection("users").handler(handler.clone()).build().unwrap()])
        .unwrap();
    scheduler.start().await.unwrap();

    for i in 1..=3 {
        cluster.log.append("db1", OperationKind::Insert, "users", json!({"id": i}));
    }
    assert!(wait_until(WAIT, || handler.positions().len() == 3).await);

    cluster.oracle.set_leader(false);
    tokio::time::sleep(Duration::from_millis(50)).await;
    for i in 4..=5 {
        cluster.log.append("db1", OperationKind::Insert, "users", json!({"id": i}));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handler.positions().len(), 3);

    cluster.oracle.set_leader(true);
    assert!(wait_until(WAIT, || handler.positions().len() == 5).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handler.positions(), vec![1, 2, 3, 4, 5]);
    scheduler.shutdown().await;
}

/// A second instance started on the same store picks up where the first one
/// stopped.
#[tokio::test]
async fn test_restart_on_another_instance() {
    enable_logger();
    let cluster = Cluster::new();
    let first = RecordingHandler::new();
    let mut scheduler = cluster.scheduler(watch_config());
    scheduler
        .add_tasks([TaskBuilder::new("cache").collection("users").handler(first.clone()).build().unwrap()])
        .unwrap();
    scheduler.start().await.unwrap();

    let token = cluster.log.append("db1", OperationKind::Insert, "users", json!({"id": 1}));
    assert!(wait_until(WAIT, || first.positions() == vec![1]).await);
    let expected = TokenInfo::from_token(&token);
    let mut committed = None;
    for _ in 0..1000 {
        committed = cluster.store.get(&db1(), "cache").await.unwrap();
        if committed.as_ref() == Some(&expected) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(committed, Some(expected));
    scheduler.shutdown().await;

    cluster.log.append("db1", OperationKind::Insert, "users", json!({"id": 2}));

    let second = RecordingHandler::new();
    let mut scheduler = cluster.scheduler(watch_config());
    scheduler
        .add_tasks([TaskBuilder::new("cache").collection("users").handler(second.clone()).build().unwrap()])
        .unwrap();
    scheduler.start().await.unwrap();

    assert!(wait_until(WAIT, || second.positions() == vec![2]).await);
    scheduler.shutdown().await;
}

/// The resume point fell out of the retained log: the consumer restarts from
/// now instead of failing forever.
#[tokio::test]
async fn test_lost_history_restarts_from_now() {
    enable_logger();
    let cluster = Cluster::new();
    let tokens: Vec<_> = (1..=10)
        .map(|i| cluster.log.append("db1", OperationKind::Insert, "users", json!({"id": i})))
        .collect();
    cluster.log.truncate_before("db1", 6);
    cluster.store.set(&db1(), "cache", &TokenInfo::from_token(&tokens[1])).await.unwrap();

    let handler = RecordingHandler::new();
    let mut scheduler = cluster.scheduler(watch_config());
    scheduler
        .add_tasks([TaskBuilder::new("cache").collection("users").handler(handler.clone()).build().unwrap()])
        .unwrap();
    scheduler.start().await.unwrap();

    assert!(wait_until(WAIT, || cluster.log.open_history("db1").len() >= 2).await);
    let mut reset = None;
    for _ in 0..1000 {
        reset = cluster.store.get(&db1(), "cache").await.unwrap();
        if reset.as_ref().is_some_and(|t| !t.has_token()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(reset.is_some_and(|t| !t.has_token()));

    cluster.log.append("db1", OperationKind::Insert, "users", json!({"id": 11}));
    assert!(wait_until(WAIT, || handler.positions() == vec![11]).await);
    scheduler.shutdown().await;
}
