use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::position_token;
use crate::DbInfo;
use crate::Event;
use crate::OperationKind;
use crate::ResumeToken;
use crate::RetryOptions;
use crate::SchedulerConfig;
use crate::Timestamp;
use crate::TokenInfo;

pub fn test_db() -> DbInfo {
    DbInfo::new("db1", "w1")
}

/// Live event at log position `pos`; cluster time grows with the position.
pub fn event_at(
    task: &str,
    pos: u64,
) -> Event {
    Event {
        operation: OperationKind::Insert,
        db_uuid: "db1".to_string(),
        task_id: task.to_string(),
        collection: "users".to_string(),
        document: Arc::new(json!({"id": pos})),
        token: ResumeToken::new(position_token(pos), Timestamp::new(1_000 + pos as u32, 0)),
        position: pos,
    }
}

pub fn snapshot_row(
    task: &str,
    id: u64,
    start_at: Timestamp,
) -> Event {
    Event {
        operation: OperationKind::Snapshot,
        db_uuid: "db1".to_string(),
        task_id: task.to_string(),
        collection: "users".to_string(),
        document: Arc::new(json!({"id": id})),
        token: ResumeToken::new("", start_at),
        position: id,
    }
}

pub fn committed_at(pos: u64) -> TokenInfo {
    TokenInfo::from_token(&event_at("", pos).token)
}

pub fn fast_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        leader_poll_interval_ms: 5,
        follower_poll_interval_ms: 10,
        flush_interval_ms: 5,
        rewatch_retry_delay_ms: 10,
        max_unhandled_events: 100,
        default_batch_size: 10,
        list_page_size: 10,
    }
}

pub fn fast_retry(max_attempts: usize) -> RetryOptions {
    RetryOptions::new(max_attempts, Duration::from_millis(10))
}

/// Polls `condition` every few milliseconds until it holds or `timeout`
/// elapses.
pub async fn wait_until<F>(
    timeout: Duration,
    condition: F,
) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
