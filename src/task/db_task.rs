//! One task bound to one physical database.
//!
//! A [`DbWatchTask`] owns the consumer side of two bounded queues: the live
//! queue fed by the database watcher and the cold-start queue fed by the
//! snapshot pump. Its drain loop batches events, calls the handler with a
//! bounded retry, and commits the last token of every batch after the handler
//! returned. The watcher side of the queues and the committed token is the
//! cloneable [`TaskHandle`].

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use nanoid::nanoid;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::Task;
use crate::metrics;
use crate::utils::async_task::sleep_or_stop;
use crate::BatchBuffer;
use crate::DbInfo;
use crate::Event;
use crate::ProgressSignal;
use crate::ResumeToken;
use crate::Result;
use crate::RetryOptions;
use crate::SchedulerConfig;
use crate::TokenInfo;
use crate::TokenStore;

/// Item of the cold-start queue
#[derive(Debug)]
pub enum ListItem {
    Row(Event),
    /// End of the snapshot; flushes the last partial batch
    Done,
}

/// Watcher side of one consumer: queue senders plus its committed token.
#[derive(Clone)]
pub struct TaskHandle {
    id: String,
    events: mpsc::Sender<Event>,
    list: mpsc::Sender<ListItem>,
    committed: Arc<ArcSwap<TokenInfo>>,
    // bumped by every out-of-band position change
    epoch: Arc<AtomicU64>,
    batch_size: usize,
    needs_cold_start: bool,
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("committed", &self.committed.load().to_string())
            .finish()
    }
}

impl TaskHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn needs_cold_start(&self) -> bool {
        self.needs_cold_start
    }

    pub fn committed(&self) -> Arc<TokenInfo> {
        self.committed.load_full()
    }

    /// Replaces the in-memory position without touching the token store.
    ///
    /// The drain loop forgets what it admitted before, so events after the
    /// new position are delivered even if they sort before older ones.
    pub(crate) fn set_committed(
        &self,
        token: TokenInfo,
    ) {
        self.committed.store(Arc::new(token));
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Pushes a live event, waiting for queue room.
    ///
    /// Returns false only if the stop signal fired first. A closed queue (its
    /// loop already exited) drops the event.
    pub async fn push(
        &self,
        event: Event,
        stop: &CancellationToken,
    ) -> bool {
        tokio::select! {
            biased;
            _ = stop.cancelled() => false,
            sent = self.events.send(event) => {
                if let Err(e) = sent {
                    warn!(task = %self.id, event = %e.0, "live queue closed, event dropped");
                }
                true
            }
        }
    }

    /// Pushes a cold-start item; same contract as [`TaskHandle::push`].
    pub async fn push_list(
        &self,
        item: ListItem,
        stop: &CancellationToken,
    ) -> bool {
        tokio::select! {
            biased;
            _ = stop.cancelled() => false,
            sent = self.list.send(item) => {
                if sent.is_err() {
                    warn!(task = %self.id, "cold-start queue closed, item dropped");
                }
                true
            }
        }
    }
}

pub struct DbWatchTask {
    task: Task,
    db: DbInfo,
    batch_size: usize,
    retry: RetryOptions,
    flush_interval: Duration,
    store: Arc<dyn TokenStore>,
    committed: Arc<ArcSwap<TokenInfo>>,
    epoch: Arc<AtomicU64>,
    seen_epoch: u64,
    /// Newest live event buffered or handled; a rewatch replays events up to it
    last_admitted: Option<ResumeToken>,
    progress: ProgressSignal,
    events: mpsc::Receiver<Event>,
    list: mpsc::Receiver<ListItem>,
}

impl std::fmt::Debug for DbWatchTask {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("DbWatchTask")
            .field("task", &self.task.name)
            .field("db", &self.db.uuid)
            .field("batch_size", &self.batch_size)
            .field("retry", &self.retry)
            .finish()
    }
}

impl DbWatchTask {
    /// Binds `task` to `db`, starting from `committed`.
    pub fn new(
        task: Task,
        db: DbInfo,
        config: &SchedulerConfig,
        default_retry: RetryOptions,
        store: Arc<dyn TokenStore>,
        progress: ProgressSignal,
        committed: TokenInfo,
    ) -> (Self, TaskHandle) {
        let batch_size = task.batch_size.unwrap_or(config.default_batch_size);
        let retry = task.retry.unwrap_or(default_retry);

        let (events_tx, events_rx) = mpsc::channel(config.queue_capacity(batch_size));
        let (list_tx, list_rx) = mpsc::channel(config.queue_capacity(batch_size));
        let committed = Arc::new(ArcSwap::from_pointee(committed));
        let epoch = Arc::new(AtomicU64::new(0));

        let handle = TaskHandle {
            id: task.name.clone(),
            events: events_tx,
            list: list_tx,
            committed: Arc::clone(&committed),
            epoch: Arc::clone(&epoch),
            batch_size,
            needs_cold_start: task.needs_cold_start,
        };

        let task = Self {
            task,
            db,
            batch_size,
            retry,
            flush_interval: config.flush_interval(),
            store,
            committed,
            epoch,
            seen_epoch: 0,
            last_admitted: None,
            progress,
            events: events_rx,
            list: list_rx,
        };
        (task, handle)
    }

    pub fn id(&self) -> &str {
        &self.task.name
    }

    /// Drains the cold-start queue (if the task needs one) and then the live
    /// queue until the stop signal fires.
    pub async fn run(
        mut self,
        stop: CancellationToken,
    ) -> Result<()> {
        if self.task.needs_cold_start {
            if !self.drain_list(&stop).await {
                return Ok(());
            }
            info!(db = %self.db.uuid, task = %self.id(), "cold start finished, switching to live events");
        }
        self.drain_live(&stop).await;
        debug!(db = %self.db.uuid, task = %self.id(), "watch task stopped");
        Ok(())
    }

    /// Returns false if stopped before the end-of-list marker.
    async fn drain_list(
        &mut self,
        stop: &CancellationToken,
    ) -> bool {
        let mut buffer = BatchBuffer::new(self.batch_size, self.flush_interval);
        let mut tick = interval(self.flush_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => return false,
                item = self.list.recv() => match item {
                    Some(ListItem::Row(event)) => {
                        if !self.is_valid(&event) {
                            continue;
                        }
                        if buffer.push(event).is_some() && !self.handle_events(buffer.take(), false, stop).await {
                            return false;
                        }
                    }
                    Some(ListItem::Done) | None => {
                        if !buffer.is_empty() && !self.handle_events(buffer.take(), false, stop).await {
                            return false;
                        }
                        return true;
                    }
                },
                _ = tick.tick() => {
                    if buffer.should_flush() && !self.handle_events(buffer.take(), false, stop).await {
                        return false;
                    }
                }
            }
        }
    }

    async fn drain_live(
        &mut self,
        stop: &CancellationToken,
    ) {
        let mut buffer = BatchBuffer::new(self.batch_size, self.flush_interval);
        let mut tick = interval(self.flush_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => return,
                event = self.events.recv() => {
                    let Some(event) = event else {
                        return;
                    };
                    if !self.is_valid(&event) || !self.is_unhandled(&event) {
                        continue;
                    }
                    if buffer.push(event).is_some() && !self.handle_events(buffer.take(), true, stop).await {
                        return;
                    }
                },
                _ = tick.tick() => {
                    if buffer.should_flush() && !self.handle_events(buffer.take(), true, stop).await {
                        return;
                    }
                }
            }
        }
    }

    fn is_valid(
        &self,
        event: &Event,
    ) -> bool {
        let Some(validator) = &self.task.validator else {
            return true;
        };
        match validator.validate(event) {
            Ok(()) => true,
            Err(reason) => {
                warn!(db = %self.db.uuid, task = %self.id(), %event, %reason, "invalid event dropped");
                metrics::EVENTS_DROPPED
                    .with_label_values(&[&self.db.uuid, self.id(), "invalid"])
                    .inc();
                false
            }
        }
    }

    /// Replay filter: events at or before the committed position were handled
    /// already, and events at or before the last admitted one are already in
    /// flight.
    fn is_unhandled(
        &mut self,
        event: &Event,
    ) -> bool {
        let epoch = self.epoch.load(Ordering::Acquire);
        if epoch != self.seen_epoch {
            self.seen_epoch = epoch;
            self.last_admitted = None;
        }

        let committed = self.committed.load();
        let in_flight = self
            .last_admitted
            .as_ref()
            .is_some_and(|last| event.token.data <= last.data);
        if committed.admits(&event.token) && !in_flight {
            self.last_admitted = Some(event.token.clone());
            return true;
        }
        trace!(db = %self.db.uuid, task = %self.id(), %event, committed = %committed, "replayed event dropped");
        metrics::EVENTS_DROPPED
            .with_label_values(&[&self.db.uuid, self.id(), "replay"])
            .inc();
        false
    }

    /// Hands one batch to the handler with the task's bounded retry, then
    /// commits the last token if `commit` is set.
    ///
    /// Returns false if the stop signal interrupted the work; nothing is
    /// committed in that case.
    pub(crate) async fn handle_events(
        &self,
        mut events: Vec<Event>,
        commit: bool,
        stop: &CancellationToken,
    ) -> bool {
        if events.is_empty() {
            return true;
        }
        let rid = nanoid!(8);
        let db_uuid = self.db.uuid.as_str();
        let task = self.id();
        let max_attempts = self.retry.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(%rid, db = db_uuid, task, attempt, count = events.len(), "handle batch");

            if !self.task.handler.handle_batch(&self.db, &events).await {
                metrics::BATCHES_HANDLED.with_label_values(&[db_uuid, task, "ok"]).inc();
                break;
            }

            if attempt >= max_attempts {
                error!(
                    %rid,
                    db = db_uuid,
                    task,
                    attempts = attempt,
                    count = events.len(),
                    first = %events[0],
                    last = %events[events.len() - 1],
                    "handler still failing after max attempts, batch skipped"
                );
                metrics::BATCHES_HANDLED
                    .with_label_values(&[db_uuid, task, "best_effort"])
                    .inc();
                break;
            }

            warn!(%rid, db = db_uuid, task, attempt, max_attempts, "handler asked for retry");
            metrics::HANDLER_RETRIES.with_label_values(&[db_uuid, task]).inc();
            if !sleep_or_stop(self.retry.retry_interval(), stop).await {
                return false;
            }

            if commit && !self.refresh_before_retry(&rid, &mut events).await {
                metrics::BATCHES_HANDLED
                    .with_label_values(&[db_uuid, task, "superseded"])
                    .inc();
                return true;
            }
        }

        if !commit {
            return true;
        }
        let last = TokenInfo::from_token(&events[events.len() - 1].token);
        self.commit(&rid, last, stop).await
    }

    /// Drops the prefix of `events` already committed by another instance.
    /// Returns false if nothing is left to handle.
    async fn refresh_before_retry(
        &self,
        rid: &str,
        events: &mut Vec<Event>,
    ) -> bool {
        let refreshed = match self.store.get(&self.db, self.id()).await {
            Ok(Some(token)) => token,
            Ok(None) => return true,
            Err(e) => {
                warn!(%rid, db = %self.db.uuid, task = %self.id(), "failed to refresh token before retry: {:?}", e);
                return true;
            }
        };

        let before = events.len();
        events.retain(|e| refreshed.admits(&e.token));
        if events.is_empty() {
            info!(%rid, db = %self.db.uuid, task = %self.id(), %refreshed, "batch already committed elsewhere");
            self.committed.store(Arc::new(refreshed));
            self.progress.notify();
            return false;
        }
        if events.len() != before {
            info!(%rid, db = %self.db.uuid, task = %self.id(), %refreshed, remaining = events.len(), "stored token moved, retrying remainder");
        }
        true
    }

    /// Persists `token`, retrying the store until it succeeds or the stop
    /// signal fires, then publishes it to the watcher.
    async fn commit(
        &self,
        rid: &str,
        token: TokenInfo,
        stop: &CancellationToken,
    ) -> bool {
        loop {
            match self.store.set(&self.db, self.id(), &token).await {
                Ok(()) => break,
                Err(e) => {
                    error!(%rid, db = %self.db.uuid, task = %self.id(), %token, "failed to commit token: {:?}", e);
                    metrics::TOKEN_COMMIT_FAILURES
                        .with_label_values(&[&self.db.uuid, self.id()])
                        .inc();
                    if !sleep_or_stop(self.retry.retry_interval(), stop).await {
                        return false;
                    }
                }
            }
        }
        debug!(%rid, db = %self.db.uuid, task = %self.id(), %token, "token committed");
        self.committed.store(Arc::new(token));
        self.progress.notify();
        true
    }
}
