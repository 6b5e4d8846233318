use std::time::Duration;

use feedwatch::position_token;
use feedwatch::Error;
use feedwatch::OperationKind;
use feedwatch::RetryOptions;
use feedwatch::SchedulerError;
use feedwatch::TaskBuilder;
use feedwatch::TokenInfo;
use feedwatch::TokenStore;
use feedwatch::DB_WATCHER_TOKEN_KEY;
use serde_json::json;

use crate::common::db1;
use crate::common::wait_until;
use crate::common::watch_config;
use crate::common::Cluster;
use crate::common::GatedHandler;
use crate::common::RecordingHandler;
use crate::common::WAIT;
use crate::enable_logger;

/// Consumer A committed 5, B committed 2; log holds 1..6.
#[tokio::test]
async fn test_consumers_resume_from_their_own_tokens() {
    enable_logger();
    let cluster = Cluster::new();
    let tokens: Vec<_> = (1..=6)
        .map(|i| cluster.log.append("db1", OperationKind::Insert, "users", json!({"id": i})))
        .collect();
    cluster.store.set(&db1(), "a", &TokenInfo::from_token(&tokens[4])).await.unwrap();
    cluster.store.set(&db1(), "b", &TokenInfo::from_token(&tokens[1])).await.unwrap();

    let a = RecordingHandler::new();
    let b = RecordingHandler::new();
    let mut scheduler = cluster.scheduler(watch_config());
    scheduler
        .add_tasks([
            TaskBuilder::new("a").collection("users").handler(a.clone()).build().unwrap(),
            TaskBuilder::new("b").collection("users").handler(b.clone()).build().unwrap(),
        ])
        .unwrap();
    scheduler.start().await.unwrap();

    assert!(wait_until(WAIT, || b.positions().len() == 4).await);
    assert!(wait_until(WAIT, || a.positions().len() == 1).await);
    assert_eq!(a.positions(), vec![6]);
    assert_eq!(b.positions(), vec![3, 4, 5, 6]);

    // one shared cursor, opened at the slowest consumer
    let opens = cluster.log.open_history("db1");
    assert_eq!(opens.len(), 1);
    assert_eq!(opens[0].resume_from.token.as_deref(), Some(position_token(2).as_str()));

    let last = TokenInfo::from_token(&tokens[5]);
    let store = cluster.store.clone();
    let mut watermark = None;
    for _ in 0..1000 {
        watermark = store.get(&db1(), DB_WATCHER_TOKEN_KEY).await.unwrap();
        if watermark.as_ref() == Some(&last) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(watermark, Some(last.clone()));
    assert_eq!(store.get(&db1(), "a").await.unwrap(), Some(last.clone()));
    assert_eq!(store.get(&db1(), "b").await.unwrap(), Some(last));

    scheduler.shutdown().await;
}

/// A handler that keeps failing gets `max_attempts` calls, then the batch is
/// committed and the stream moves on.
#[tokio::test]
async fn test_failing_handler_is_bounded() {
    enable_logger();
    let cluster = Cluster::new();
    let handler = RecordingHandler::failing(3);
    let mut scheduler = cluster.scheduler(watch_config());
    scheduler
        .add_tasks([TaskBuilder::new("flaky")
            .collection("users")
            .retry(RetryOptions::new(3, Duration::from_millis(5)))
            .handler(handler.clone())
            .build()
            .unwrap()])
        .unwrap();
    scheduler.start().await.unwrap();

    cluster.log.append("db1", OperationKind::Insert, "users", json!({"id": 1}));
    assert!(wait_until(WAIT, || handler.calls() == 3).await);

    let second = cluster.log.append("db1", OperationKind::Insert, "users", json!({"id": 2}));
    assert!(wait_until(WAIT, || handler.calls() == 4).await);
    assert_eq!(handler.positions(), vec![1, 1, 1, 2]);

    let store = cluster.store.clone();
    let expected = TokenInfo::from_token(&second);
    let mut committed = None;
    for _ in 0..1000 {
        committed = store.get(&db1(), "flaky").await.unwrap();
        if committed.as_ref() == Some(&expected) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(committed, Some(expected));
    scheduler.shutdown().await;
}

/// A stuck consumer stalls the shared cursor once its queue is full; the
/// other consumer catches up after it drains.
#[tokio::test]
async fn test_slow_consumer_backpressures_the_cursor() {
    enable_logger();
    let cluster = Cluster::new();
    let mut config = watch_config();
    config.scheduler.max_unhandled_events = 2;

    let fast = RecordingHandler::new();
    let slow = GatedHandler::new();
    let mut scheduler = cluster.scheduler(config);
    scheduler
        .add_tasks([
            TaskBuilder::new("fast").collection("users").batch_size(1).handler(fast.clone()).build().unwrap(),
            TaskBuilder::new("slow").collection("users").batch_size(1).handler(slow.clone()).build().unwrap(),
        ])
        .unwrap();
    scheduler.start().await.unwrap();

    for i in 1..=30 {
        cluster.log.append("db1", OperationKind::Insert, "users", json!({"id": i}));
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(fast.positions().len() < 30);
    assert!(slow.positions().is_empty());

    slow.open();
    let expected: Vec<u64> = (1..=30).collect();
    assert!(wait_until(WAIT, || slow.positions() == expected && fast.positions() == expected).await);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_start_errors() {
    let cluster = Cluster::new();
    let mut scheduler = cluster.scheduler(watch_config());
    assert!(matches!(
        scheduler.start().await.unwrap_err(),
        Error::Scheduler(SchedulerError::NoTasks)
    ));

    let mut config = watch_config();
    config.topology.databases[0].watch_db = Some("elsewhere".to_string());
    let mut scheduler = cluster.scheduler(config);
    scheduler
        .add_tasks([TaskBuilder::new("a").collection("users").handler(RecordingHandler::new()).build().unwrap()])
        .unwrap();
    assert!(matches!(
        scheduler.start().await.unwrap_err(),
        Error::Scheduler(SchedulerError::UnmappedDatabase { .. })
    ));
    assert!(cluster.store.is_empty());
    assert!(cluster.log.open_history("db1").is_empty());
}

#[tokio::test]
async fn test_operation_filter() {
    let cluster = Cluster::new();
    let handler = RecordingHandler::new();
    let mut scheduler = cluster.scheduler(watch_config());
    scheduler
        .add_tasks([TaskBuilder::new("deletes")
            .collection("users")
            .operations([OperationKind::Delete])
            .handler(handler.clone())
            .build()
            .unwrap()])
        .unwrap();
    scheduler.start().await.unwrap();

    cluster.log.append("db1", OperationKind::Insert, "users", json!({"id": 1}));
    cluster.log.append("db1", OperationKind::Delete, "users", json!({"id": 1}));
    assert!(wait_until(WAIT, || handler.positions() == vec![2]).await);
    assert!(handler.events().iter().all(|e| e.operation == OperationKind::Delete));
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_handler_shared_between_tasks_sees_each_task_once() {
    let cluster = Cluster::new();
    let handler = RecordingHandler::new();
    let mut scheduler = cluster.scheduler(watch_config());
    scheduler
        .add_tasks([
            TaskBuilder::new("one").collection("users").handler(handler.clone()).build().unwrap(),
            TaskBuilder::new("two").collection("users").handler(handler.clone()).build().unwrap(),
        ])
        .unwrap();
    scheduler.start().await.unwrap();

    cluster.log.append("db1", OperationKind::Insert, "users", json!({"id": 1}));
    assert!(wait_until(WAIT, || handler.positions().len() == 2).await);
    let mut tasks: Vec<String> = handler.events().into_iter().map(|e| e.task_id).collect();
    tasks.sort();
    assert_eq!(tasks, vec!["one", "two"]);
    scheduler.shutdown().await;
}
