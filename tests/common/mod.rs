use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use feedwatch::BatchHandler;
use feedwatch::DatabaseConfig;
use feedwatch::DbInfo;
use feedwatch::Event;
use feedwatch::MemoryChangeLog;
use feedwatch::MemoryTokenStore;
use feedwatch::RetryOptions;
use feedwatch::Scheduler;
use feedwatch::SchedulerConfig;
use feedwatch::StaticLeadership;
use feedwatch::TopologyConfig;
use feedwatch::WatchConfig;
use parking_lot::Mutex;

pub const WAIT: Duration = Duration::from_secs(10);

pub fn db1() -> DbInfo {
    DbInfo::new("db1", "w1")
}

pub fn watch_config() -> WatchConfig {
    WatchConfig {
        scheduler: SchedulerConfig {
            leader_poll_interval_ms: 5,
            follower_poll_interval_ms: 10,
            flush_interval_ms: 5,
            rewatch_retry_delay_ms: 10,
            max_unhandled_events: 100,
            default_batch_size: 10,
            list_page_size: 10,
        },
        retry: RetryOptions::new(3, Duration::from_millis(10)),
        topology: TopologyConfig {
            databases: vec![DatabaseConfig {
                uuid: "db1".to_string(),
                watch_db: Some("w1".to_string()),
            }],
            watch_dbs: vec!["w1".to_string()],
            default_watch_db: None,
        },
        ..Default::default()
    }
}

/// In-process deployment: one change log, one token store, one oracle.
pub struct Cluster {
    pub log: MemoryChangeLog,
    pub store: Arc<MemoryTokenStore>,
    pub oracle: Arc<StaticLeadership>,
}

impl Cluster {
    pub fn new() -> Self {
        Self {
            log: MemoryChangeLog::new(),
            store: Arc::new(MemoryTokenStore::new()),
            oracle: Arc::new(StaticLeadership::new(true)),
        }
    }

    pub fn scheduler(
        &self,
        config: WatchConfig,
    ) -> Scheduler {
        Scheduler::new(
            config,
            Arc::new(self.log.clone()),
            self.store.clone(),
            self.oracle.clone(),
        )
    }
}

/// Records every batch; answers "retry" for the first `failures` calls.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    batches: Mutex<Vec<Vec<Event>>>,
    failures: AtomicUsize,
    calls: AtomicUsize,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(failures: usize) -> Arc<Self> {
        let handler = Self::default();
        handler.failures.store(failures, Ordering::SeqCst);
        Arc::new(handler)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<Event> {
        self.batches.lock().iter().flatten().cloned().collect()
    }

    pub fn positions(&self) -> Vec<u64> {
        self.batches.lock().iter().flatten().map(|e| e.position).collect()
    }
}

#[async_trait]
impl BatchHandler for RecordingHandler {
    async fn handle_batch(
        &self,
        _db: &DbInfo,
        events: &[Event],
    ) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batches.lock().push(events.to_vec());

        let left = self.failures.load(Ordering::SeqCst);
        if left == 0 {
            return false;
        }
        self.failures.store(left - 1, Ordering::SeqCst);
        true
    }
}

/// Holds every batch until [`GatedHandler::open`] is called.
#[derive(Debug, Default)]
pub struct GatedHandler {
    open: AtomicBool,
    inner: RecordingHandler,
}

impl GatedHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    pub fn positions(&self) -> Vec<u64> {
        self.inner.positions()
    }
}

#[async_trait]
impl BatchHandler for GatedHandler {
    async fn handle_batch(
        &self,
        db: &DbInfo,
        events: &[Event],
    ) -> bool {
        while !self.open.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        self.inner.handle_batch(db, events).await
    }
}

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
