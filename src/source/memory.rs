//! In-memory replicated log implementing [`ChangeSource`].
//!
//! Each database keeps an ordered list of changes plus the current document
//! set (for snapshots). Tokens are zero-padded hex positions, so they sort in
//! log order. Fault hooks let callers truncate history, fail cursors and break
//! snapshots.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;
use tracing::trace;

use super::ChangeCursor;
use super::ChangeSource;
use super::CursorPoll;
use super::SnapshotStream;
use crate::ChangeEvent;
use crate::DbInfo;
use crate::ListOptions;
use crate::MergedFilter;
use crate::OperationKind;
use crate::ResumeToken;
use crate::Result;
use crate::SourceError;
use crate::Timestamp;
use crate::WatchOptions;

pub fn position_token(position: u64) -> String {
    format!("{:016x}", position)
}

#[derive(Default)]
struct DbLog {
    entries: Vec<ChangeEvent>,
    // (collection, id) -> (document, position of its last write)
    documents: BTreeMap<(String, String), (Arc<Value>, u64)>,
    next_position: u64,
    last_time: Timestamp,
    notify: Arc<Notify>,

    open_history: Vec<WatchOptions>,
    cursor_failures: usize,
    snapshot_failure_after: Option<usize>,
    snapshot_row_delay: Option<Duration>,
    snapshot_count: usize,
}

impl DbLog {
    fn tick(&mut self) -> Timestamp {
        let now = Timestamp::now();
        let next = if now > self.last_time {
            now
        } else if self.last_time.nano < 999_999_999 {
            Timestamp::new(self.last_time.sec, self.last_time.nano + 1)
        } else {
            Timestamp::new(self.last_time.sec + 1, 0)
        };
        self.last_time = next;
        next
    }

    fn first_retained(&self) -> Option<&ChangeEvent> {
        self.entries.first()
    }

    /// Position the cursor resumes after, or the history-lost error.
    fn resume_position(
        &self,
        opts: &WatchOptions,
    ) -> Result<u64> {
        let first = self.first_retained();
        let resume = &opts.resume_from;

        if let Some(token) = resume.token.as_deref().filter(|t| !t.is_empty()) {
            if let Some(first) = first {
                // resuming before the event preceding the retained history loses events
                if first.position > 1 && token < position_token(first.position - 1).as_str() {
                    return Err(SourceError::HistoryLost(token.to_string()).into());
                }
            }
            let after = self
                .entries
                .iter()
                .take_while(|e| e.token.data.as_str() <= token)
                .last()
                .map(|e| e.position)
                .unwrap_or_else(|| first.map(|f| f.position.saturating_sub(1)).unwrap_or(self.next_position));
            return Ok(after);
        }

        if let Some(first) = first {
            if first.position > 1 && resume.start_at_time < first.token.cluster_time {
                return Err(SourceError::HistoryLost(resume.start_at_time.to_string()).into());
            }
        }
        let after = self
            .entries
            .iter()
            .take_while(|e| e.token.cluster_time < resume.start_at_time)
            .last()
            .map(|e| e.position)
            .unwrap_or_else(|| first.map(|f| f.position.saturating_sub(1)).unwrap_or(self.next_position));
        Ok(after)
    }
}

#[derive(Clone, Default)]
pub struct MemoryChangeLog {
    dbs: Arc<Mutex<HashMap<String, DbLog>>>,
}

impl std::fmt::Debug for MemoryChangeLog {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("MemoryChangeLog")
            .field("dbs", &self.dbs.lock().len())
            .finish()
    }
}

fn document_id(document: &Value) -> String {
    match document.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

impl MemoryChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one change and returns its token.
    ///
    /// Documents are keyed by their `id` field for snapshots.
    pub fn append(
        &self,
        db: &str,
        operation: OperationKind,
        collection: &str,
        document: Value,
    ) -> ResumeToken {
        let mut dbs = self.dbs.lock();
        let log = dbs.entry(db.to_string()).or_default();

        log.next_position += 1;
        let position = log.next_position;
        let token = ResumeToken::new(position_token(position), log.tick());
        let document = Arc::new(document);

        let key = (collection.to_string(), document_id(&document));
        match operation {
            OperationKind::Insert | OperationKind::Update | OperationKind::Replace => {
                log.documents.insert(key, (Arc::clone(&document), position));
            }
            OperationKind::Delete => {
                log.documents.remove(&key);
            }
            OperationKind::Invalidate | OperationKind::Snapshot => {}
        }

        log.entries.push(ChangeEvent {
            operation,
            collection: collection.to_string(),
            document,
            token: token.clone(),
            position,
        });
        trace!(db, position, %operation, collection, "change appended");
        log.notify.notify_waiters();
        token
    }

    /// Drops every change before `position`, as a capped log rolling over.
    pub fn truncate_before(
        &self,
        db: &str,
        position: u64,
    ) {
        let mut dbs = self.dbs.lock();
        let log = dbs.entry(db.to_string()).or_default();
        log.entries.retain(|e| e.position >= position);
    }

    /// The next `count` cursor polls on `db` fail.
    pub fn fail_cursor_polls(
        &self,
        db: &str,
        count: usize,
    ) {
        self.dbs.lock().entry(db.to_string()).or_default().cursor_failures = count;
    }

    /// The next snapshot of `db` fails after yielding `rows` rows.
    pub fn fail_next_snapshot_after(
        &self,
        db: &str,
        rows: usize,
    ) {
        self.dbs.lock().entry(db.to_string()).or_default().snapshot_failure_after = Some(rows);
    }

    /// Slows snapshot reads down by `delay` per row.
    pub fn set_snapshot_row_delay(
        &self,
        db: &str,
        delay: Duration,
    ) {
        self.dbs.lock().entry(db.to_string()).or_default().snapshot_row_delay = Some(delay);
    }

    /// Options of every cursor opened on `db`, oldest first.
    pub fn open_history(
        &self,
        db: &str,
    ) -> Vec<WatchOptions> {
        self.dbs
            .lock()
            .get(db)
            .map(|log| log.open_history.clone())
            .unwrap_or_default()
    }

    pub fn snapshot_count(
        &self,
        db: &str,
    ) -> usize {
        self.dbs.lock().get(db).map(|log| log.snapshot_count).unwrap_or(0)
    }

    pub fn last_position(
        &self,
        db: &str,
    ) -> u64 {
        self.dbs.lock().get(db).map(|log| log.next_position).unwrap_or(0)
    }
}

#[async_trait]
impl ChangeSource for MemoryChangeLog {
    async fn open(
        &self,
        db: &DbInfo,
        filter: &MergedFilter,
        opts: &WatchOptions,
    ) -> Result<Box<dyn ChangeCursor>> {
        let mut dbs = self.dbs.lock();
        let log = dbs.entry(db.uuid.clone()).or_default();
        log.open_history.push(opts.clone());

        let after = log.resume_position(opts)?;
        debug!(db = %db.uuid, after, resume_from = %opts.resume_from, "memory cursor opened");

        Ok(Box::new(MemoryCursor {
            dbs: Arc::clone(&self.dbs),
            notify: Arc::clone(&log.notify),
            db: db.uuid.clone(),
            filter: filter.clone(),
            after,
            opened_at: log.next_position,
            batch_size: opts.batch_size.max(1),
            max_await: opts.max_await_time,
        }))
    }

    async fn snapshot(
        &self,
        db: &DbInfo,
        filter: &MergedFilter,
        opts: &ListOptions,
    ) -> Result<SnapshotStream> {
        let mut dbs = self.dbs.lock();
        let log = dbs.entry(db.uuid.clone()).or_default();
        log.snapshot_count += 1;

        let start_at = log.tick();
        let mut rows: Vec<Result<ChangeEvent>> = log
            .documents
            .iter()
            .map(|((collection, _), (document, position))| ChangeEvent {
                operation: OperationKind::Snapshot,
                collection: collection.clone(),
                document: Arc::clone(document),
                token: ResumeToken::new("", start_at),
                position: *position,
            })
            .filter(|row| filter.matches(row))
            .map(Ok)
            .collect();

        if let Some(after) = log.snapshot_failure_after.take() {
            rows.truncate(after);
            rows.push(Err(SourceError::Snapshot("snapshot cursor killed".to_string()).into()));
        }

        debug!(db = %db.uuid, rows = rows.len(), page_size = opts.page_size, %start_at, "memory snapshot started");

        let delay = log.snapshot_row_delay;
        let rows = stream::iter(rows)
            .then(move |row| async move {
                if let Some(d) = delay {
                    tokio::time::sleep(d).await;
                }
                row
            })
            .boxed();

        Ok(SnapshotStream { start_at, rows })
    }
}

struct MemoryCursor {
    dbs: Arc<Mutex<HashMap<String, DbLog>>>,
    notify: Arc<Notify>,
    db: String,
    filter: MergedFilter,
    after: u64,
    // an invalidation only closes the cursors open when it happened
    opened_at: u64,
    batch_size: usize,
    max_await: Option<Duration>,
}

impl MemoryCursor {
    fn poll_once(&mut self) -> Result<Vec<ChangeEvent>> {
        let mut dbs = self.dbs.lock();
        let Some(log) = dbs.get_mut(&self.db) else {
            return Ok(Vec::new());
        };

        if log.cursor_failures > 0 {
            log.cursor_failures -= 1;
            return Err(SourceError::Cursor("cursor killed".to_string()).into());
        }

        if let Some(first) = log.first_retained() {
            if first.position > self.after + 1 {
                return Err(SourceError::HistoryLost(position_token(self.after)).into());
            }
        }

        let mut events = Vec::new();
        let start = self.after;
        for entry in log.entries.iter().filter(|e| e.position > start) {
            self.after = entry.position;
            if entry.operation == OperationKind::Invalidate && entry.position <= self.opened_at {
                continue;
            }
            if self.filter.is_empty() || self.filter.matches(entry) {
                events.push(entry.clone());
                if events.len() >= self.batch_size {
                    break;
                }
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl ChangeCursor for MemoryCursor {
    async fn next(
        &mut self,
        timeout: Duration,
    ) -> Result<CursorPoll> {
        let timeout = self.max_await.map_or(timeout, |max| timeout.min(max));
        let deadline = Instant::now() + timeout;
        let notify = Arc::clone(&self.notify);

        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let events = self.poll_once()?;
            if !events.is_empty() {
                return Ok(CursorPoll::Events(events));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(CursorPoll::Timeout);
            }
        }
    }
}
