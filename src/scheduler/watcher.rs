//! Database watcher: the single cursor of one physical database.
//!
//! The watcher opens the cursor at the watermark of its consumers, tags every
//! change with the consumers whose filter matches it and pushes it onto their
//! queues. Leadership flips and cursor failures both go through
//! [`WatchState::RewatchPending`], which drops the cursor and reopens it from a
//! freshly computed watermark.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::BatchBuffer;
use super::LeaderObserver;
use super::ProgressSignal;
use super::WatchState;
use crate::metrics;
use crate::utils::async_task::sleep_or_stop;
use crate::ChangeCursor;
use crate::ChangeEvent;
use crate::ChangeSource;
use crate::CursorPoll;
use crate::DbInfo;
use crate::Error;
use crate::LeadershipOracle;
use crate::MergedFilter;
use crate::OperationKind;
use crate::Result;
use crate::SchedulerConfig;
use crate::TaskHandle;
use crate::Timestamp;
use crate::TokenInfo;
use crate::TokenStore;
use crate::WatchOptions;
use crate::DB_WATCHER_TOKEN_KEY;

/// Database level cursor options merged across every task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorHints {
    pub majority_committed: bool,
    pub max_await_time: Option<Duration>,
}

impl CursorHints {
    pub fn merge(
        &mut self,
        majority_committed: bool,
        max_await_time: Option<Duration>,
    ) {
        self.majority_committed |= majority_committed;
        self.max_await_time = match (self.max_await_time, max_await_time) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}

/// Why the cursor is being reopened
enum Rewatch {
    Leadership,
    CursorError,
    Invalidated,
    HistoryLost,
}

impl Rewatch {
    fn as_str(&self) -> &'static str {
        match self {
            Rewatch::Leadership => "leadership",
            Rewatch::CursorError => "cursor_error",
            Rewatch::Invalidated => "invalidated",
            Rewatch::HistoryLost => "history_lost",
        }
    }
}

pub struct DbWatcher {
    db: DbInfo,
    filter: MergedFilter,
    hints: CursorHints,
    tasks: Vec<TaskHandle>,
    index: HashMap<String, usize>,
    source: Arc<dyn ChangeSource>,
    store: Arc<dyn TokenStore>,
    oracle: Arc<dyn LeadershipOracle>,
    progress: ProgressSignal,
    /// Largest batch size of the consumers; sizes the cursor batches
    batch_size: usize,
    config: SchedulerConfig,
}

impl std::fmt::Debug for DbWatcher {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("DbWatcher")
            .field("db", &self.db)
            .field("tasks", &self.tasks)
            .field("hints", &self.hints)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl DbWatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: DbInfo,
        filter: MergedFilter,
        hints: CursorHints,
        tasks: Vec<TaskHandle>,
        source: Arc<dyn ChangeSource>,
        store: Arc<dyn TokenStore>,
        oracle: Arc<dyn LeadershipOracle>,
        progress: ProgressSignal,
        config: SchedulerConfig,
    ) -> Self {
        let index = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id().to_string(), i))
            .collect();
        let batch_size = tasks
            .iter()
            .map(TaskHandle::batch_size)
            .max()
            .unwrap_or(config.default_batch_size);
        Self {
            db,
            filter,
            hints,
            tasks,
            index,
            source,
            store,
            oracle,
            progress,
            batch_size,
            config,
        }
    }

    /// Oldest committed position among the consumers of this database.
    pub fn watermark(&self) -> TokenInfo {
        let committed: Vec<Arc<TokenInfo>> = self.tasks.iter().map(|t| t.committed()).collect();
        TokenInfo::watermark(committed.iter().map(|t| t.as_ref()))
            .unwrap_or_else(|| TokenInfo::start_at(Timestamp::now()))
    }

    fn watch_options(
        &self,
        resume_from: TokenInfo,
    ) -> WatchOptions {
        WatchOptions {
            resume_from,
            majority_committed: self.hints.majority_committed,
            max_await_time: self.hints.max_await_time,
            batch_size: self.batch_size,
        }
    }

    /// Runs the watch state machine until the stop signal fires.
    pub async fn run(
        self,
        stop: CancellationToken,
    ) -> Result<()> {
        let db = self.db.uuid.as_str();
        let mut observer = LeaderObserver::new();
        let mut state = WatchState::NotLeader;
        let mut cursor: Option<Box<dyn ChangeCursor>> = None;
        let mut buffer = BatchBuffer::new(self.batch_size, self.config.flush_interval());
        let mut pending_reason = Rewatch::Leadership;
        let mut last_leader_poll = Instant::now();

        info!(db, tasks = self.tasks.len(), "database watcher started");

        loop {
            if stop.is_cancelled() {
                break;
            }
            if state == WatchState::LeaderStreaming && self.progress.take() {
                self.persist_watermark().await;
            }

            match state {
                WatchState::NotLeader => {
                    let is_leader = self.oracle.is_leader();
                    state = observer.next_state(state, is_leader);
                    if state == WatchState::RewatchPending {
                        pending_reason = Rewatch::Leadership;
                        continue;
                    }

                    tokio::select! {
                        biased;
                        _ = stop.cancelled() => break,
                        _ = tokio::time::sleep(self.config.follower_poll_interval()) => {}
                    }
                }

                WatchState::RewatchPending => {
                    if cursor.take().is_some() {
                        let dropped = buffer.discard();
                        debug!(db, dropped, "cursor dropped");
                    }

                    let is_leader = self.oracle.is_leader();
                    observer.observe(is_leader);
                    if !is_leader {
                        info!(db, "not leader, watcher paused");
                        state = WatchState::NotLeader;
                        continue;
                    }

                    let resume_from = self.watermark();
                    metrics::REWATCHES
                        .with_label_values(&[db, pending_reason.as_str()])
                        .inc();
                    match self.source.open(&self.db, &self.filter, &self.watch_options(resume_from.clone())).await {
                        Ok(c) => {
                            info!(db, %resume_from, reason = pending_reason.as_str(), "cursor opened at watermark");
                            cursor = Some(c);
                            last_leader_poll = Instant::now();
                            state = WatchState::LeaderStreaming;
                        }
                        Err(Error::Source(e)) if e.is_history_lost() => {
                            self.reset_history(&e.to_string()).await;
                            pending_reason = Rewatch::HistoryLost;
                        }
                        Err(e) => {
                            warn!(db, %resume_from, "failed to open cursor: {:?}", e);
                            pending_reason = Rewatch::CursorError;
                            if !sleep_or_stop(self.config.rewatch_retry_delay(), &stop).await {
                                break;
                            }
                        }
                    }
                }

                WatchState::LeaderStreaming => {
                    if last_leader_poll.elapsed() >= self.config.leader_poll_interval() {
                        last_leader_poll = Instant::now();
                        state = observer.next_state(state, self.oracle.is_leader());
                        if state == WatchState::RewatchPending {
                            info!(db, "leadership changed, rewatch");
                            pending_reason = Rewatch::Leadership;
                            continue;
                        }
                    }

                    let Some(c) = cursor.as_mut() else {
                        state = WatchState::RewatchPending;
                        pending_reason = Rewatch::CursorError;
                        continue;
                    };

                    let timeout = self.config.leader_poll_interval().min(self.config.flush_interval());
                    let polled = tokio::select! {
                        biased;
                        _ = stop.cancelled() => break,
                        polled = c.next(timeout) => polled,
                    };

                    match polled {
                        Ok(CursorPoll::Events(events)) => {
                            trace!(db, count = events.len(), "cursor events");
                            let mut invalidated = false;
                            for event in events {
                                if event.operation == OperationKind::Invalidate {
                                    error!(db, token = %event.token.data, "cursor invalidated");
                                    invalidated = true;
                                    break;
                                }
                                if buffer.push(event).is_some() && !self.dispatch(buffer.take(), &stop).await {
                                    return Ok(());
                                }
                            }
                            if invalidated {
                                pending_reason = Rewatch::Invalidated;
                                state = WatchState::RewatchPending;
                                if !sleep_or_stop(self.config.rewatch_retry_delay(), &stop).await {
                                    break;
                                }
                                continue;
                            }
                        }
                        Ok(CursorPoll::Timeout) => {}
                        Err(Error::Source(e)) if e.is_history_lost() => {
                            self.reset_history(&e.to_string()).await;
                            pending_reason = Rewatch::HistoryLost;
                            state = WatchState::RewatchPending;
                            continue;
                        }
                        Err(e) => {
                            warn!(db, "cursor failed, rewatch after delay: {:?}", e);
                            pending_reason = Rewatch::CursorError;
                            state = WatchState::RewatchPending;
                            if !sleep_or_stop(self.config.rewatch_retry_delay(), &stop).await {
                                break;
                            }
                            continue;
                        }
                    }

                    if buffer.should_flush() && !self.dispatch(buffer.take(), &stop).await {
                        break;
                    }
                }
            }
        }

        info!(db, "database watcher stopped");
        Ok(())
    }

    /// Routes every event to the queues of the tasks it matches, blocking on
    /// full queues. Returns false if the stop signal fired.
    async fn dispatch(
        &self,
        events: Vec<ChangeEvent>,
        stop: &CancellationToken,
    ) -> bool {
        for event in events {
            let mut matched = false;
            for task_id in self.filter.matching_tasks(&event) {
                let Some(handle) = self.index.get(task_id).map(|&i| &self.tasks[i]) else {
                    continue;
                };
                matched = true;
                if !handle.push(event.tag(&self.db.uuid, task_id), stop).await {
                    return false;
                }
                metrics::EVENTS_DISPATCHED
                    .with_label_values(&[self.db.uuid.as_str(), task_id])
                    .inc();
            }
            if !matched {
                trace!(db = %self.db.uuid, collection = %event.collection, position = event.position, "event matches no task");
            }
        }
        true
    }

    async fn persist_watermark(&self) {
        let watermark = self.watermark();
        match self.store.set(&self.db, DB_WATCHER_TOKEN_KEY, &watermark).await {
            Ok(()) => debug!(db = %self.db.uuid, %watermark, "watermark persisted"),
            Err(e) => warn!(db = %self.db.uuid, %watermark, "failed to persist watermark: {:?}", e),
        }
    }

    /// Administrative reset after the log lost our resume point: every
    /// consumer restarts from now.
    async fn reset_history(
        &self,
        reason: &str,
    ) {
        let reset = TokenInfo::start_at(Timestamp::now());
        error!(db = %self.db.uuid, reason, %reset, "resume point lost, resetting every consumer");
        for task in &self.tasks {
            if let Err(e) = self.store.set(&self.db, task.id(), &reset).await {
                error!(db = %self.db.uuid, task = %task.id(), "failed to persist reset token: {:?}", e);
            }
            task.set_committed(reset.clone());
        }
    }
}
