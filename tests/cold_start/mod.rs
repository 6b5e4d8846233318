use std::collections::BTreeSet;

use feedwatch::OperationKind;
use feedwatch::TaskBuilder;
use serde_json::json;

use crate::common::wait_until;
use crate::common::watch_config;
use crate::common::Cluster;
use crate::common::RecordingHandler;
use crate::common::WAIT;
use crate::enable_logger;

/// Every document is handed at least once even when the snapshot breaks
/// halfway, and live events follow the snapshot.
#[tokio::test]
async fn test_cold_start_survives_snapshot_failure() {
    enable_logger();
    let cluster = Cluster::new();
    for id in 1..=50u64 {
        cluster.log.append("db1", OperationKind::Insert, "users", json!({"id": id}));
    }
    cluster.log.append("db1", OperationKind::Insert, "orders", json!({"id": 1}));
    cluster.log.fail_next_snapshot_after("db1", 20);

    let handler = RecordingHandler::new();
    let mut scheduler = cluster.scheduler(watch_config());
    scheduler
        .add_tasks([TaskBuilder::new("warm")
            .collection("users")
            .cold_start(true)
            .batch_size(7)
            .handler(handler.clone())
            .build()
            .unwrap()])
        .unwrap();
    scheduler.start().await.unwrap();

    let live = cluster.log.append("db1", OperationKind::Update, "users", json!({"id": 3}));
    assert!(wait_until(WAIT, || handler.events().iter().any(|e| e.operation != OperationKind::Snapshot)).await);

    let events = handler.events();
    let first_live = events
        .iter()
        .position(|e| e.operation != OperationKind::Snapshot)
        .unwrap();
    let seen: BTreeSet<u64> = events[..first_live]
        .iter()
        .map(|e| e.document["id"].as_u64().unwrap())
        .collect();
    assert!((1..=50).all(|id| seen.contains(&id)));
    assert!(events[..first_live].iter().all(|e| e.collection == "users"));
    assert_eq!(events[first_live..].len(), 1);
    assert_eq!(events[first_live].token, live);
    assert_eq!(cluster.log.snapshot_count("db1"), 2);
    scheduler.shutdown().await;
}

/// Tasks without cold start never see snapshot rows.
#[tokio::test]
async fn test_cold_start_is_per_task() {
    let cluster = Cluster::new();
    cluster.log.append("db1", OperationKind::Insert, "users", json!({"id": 1}));

    let warm = RecordingHandler::new();
    let live = RecordingHandler::new();
    let mut scheduler = cluster.scheduler(watch_config());
    scheduler
        .add_tasks([
            TaskBuilder::new("warm").collection("users").cold_start(true).handler(warm.clone()).build().unwrap(),
            TaskBuilder::new("live").collection("users").handler(live.clone()).build().unwrap(),
        ])
        .unwrap();
    scheduler.start().await.unwrap();

    cluster.log.append("db1", OperationKind::Update, "users", json!({"id": 1}));
    assert!(wait_until(WAIT, || warm.positions().len() == 2 && live.positions().len() == 1).await);
    assert_eq!(live.positions(), vec![2]);
    assert_eq!(warm.events()[0].operation, OperationKind::Snapshot);
    assert_eq!(warm.events()[1].operation, OperationKind::Update);
    scheduler.shutdown().await;
}
