//! Snapshot pump of the cold-start phase.
//!
//! One snapshot per database serves every cold-start task on it. Rows are
//! tagged for each matching task and pushed onto its cold-start queue; the end
//! of the snapshot is signalled with [`ListItem::Done`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::utils::async_task::sleep_or_stop;
use crate::ChangeEvent;
use crate::ChangeSource;
use crate::DbInfo;
use crate::ListItem;
use crate::ListOptions;
use crate::MergedFilter;
use crate::Result;
use crate::TaskHandle;

pub struct ColdStart {
    db: DbInfo,
    filter: MergedFilter,
    tasks: HashMap<String, TaskHandle>,
    source: Arc<dyn ChangeSource>,
    opts: ListOptions,
    retry_delay: Duration,
}

impl std::fmt::Debug for ColdStart {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ColdStart")
            .field("db", &self.db)
            .field("tasks", &self.tasks.len())
            .field("opts", &self.opts)
            .finish()
    }
}

impl ColdStart {
    pub fn new(
        db: DbInfo,
        filter: MergedFilter,
        tasks: Vec<TaskHandle>,
        source: Arc<dyn ChangeSource>,
        opts: ListOptions,
        retry_delay: Duration,
    ) -> Self {
        let tasks = tasks.into_iter().map(|t| (t.id().to_string(), t)).collect();
        Self {
            db,
            filter,
            tasks,
            source,
            opts,
            retry_delay,
        }
    }

    /// Streams `rows` (the first snapshot, already opened by the caller) into
    /// the cold-start queues, restarting the snapshot on stream errors.
    pub async fn run(
        self,
        mut rows: BoxStream<'static, Result<ChangeEvent>>,
        stop: CancellationToken,
    ) -> Result<()> {
        let db = self.db.uuid.as_str();
        let mut attempt = 1;

        loop {
            let mut count = 0usize;
            let failure = loop {
                let next = tokio::select! {
                    biased;
                    _ = stop.cancelled() => return Ok(()),
                    next = rows.next() => next,
                };
                match next {
                    None => break None,
                    Some(Ok(row)) => {
                        count += 1;
                        if !self.fan_out(&row, &stop).await {
                            return Ok(());
                        }
                    }
                    Some(Err(e)) => break Some(e),
                }
            };

            match failure {
                None => {
                    info!(db, rows = count, attempt, "snapshot finished");
                    break;
                }
                Some(e) if !self.opts.with_retry => {
                    error!(db, rows = count, "snapshot failed, continuing with a partial snapshot: {:?}", e);
                    break;
                }
                Some(e) => {
                    warn!(db, rows = count, attempt, "snapshot failed, restarting: {:?}", e);
                    match self.restart(&stop).await {
                        Some(fresh) => rows = fresh,
                        None => return Ok(()),
                    }
                    attempt += 1;
                }
            }
        }

        for task in self.tasks.values() {
            if !task.push_list(ListItem::Done, &stop).await {
                return Ok(());
            }
        }
        Ok(())
    }

    async fn fan_out(
        &self,
        row: &ChangeEvent,
        stop: &CancellationToken,
    ) -> bool {
        for task_id in self.filter.matching_tasks(row) {
            let Some(task) = self.tasks.get(task_id) else {
                continue;
            };
            if !task.push_list(ListItem::Row(row.tag(&self.db.uuid, task_id)), stop).await {
                return false;
            }
        }
        true
    }

    /// Opens a fresh snapshot after the retry delay; None once stopped.
    async fn restart(
        &self,
        stop: &CancellationToken,
    ) -> Option<BoxStream<'static, Result<ChangeEvent>>> {
        loop {
            if !sleep_or_stop(self.retry_delay, stop).await {
                return None;
            }
            match self.source.snapshot(&self.db, &self.filter, &self.opts).await {
                Ok(snapshot) => {
                    debug!(db = %self.db.uuid, start_at = %snapshot.start_at, "snapshot restarted");
                    return Some(snapshot.rows);
                }
                Err(e) => warn!(db = %self.db.uuid, "failed to restart snapshot: {:?}", e),
            }
        }
    }
}
