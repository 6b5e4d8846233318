//! Top-level registry of watch tasks.
//!
//! [`Scheduler::start`] resolves the database topology, loads every
//! consumer's position, runs the cold-start snapshots and spawns one
//! [`DbWatcher`] per database plus one [`DbWatchTask`] loop per
//! (database, task) pair. [`Scheduler::stop`] cancels all of them at once.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::BoxStream;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::ColdStart;
use super::CursorHints;
use super::DbWatcher;
use super::ProgressSignal;
use crate::utils::async_task::spawn_task;
use crate::ChangeEvent;
use crate::ChangeSource;
use crate::DbInfo;
use crate::DbWatchTask;
use crate::LeadershipOracle;
use crate::ListOptions;
use crate::MergedFilter;
use crate::Result;
use crate::SchedulerError;
use crate::Task;
use crate::TaskHandle;
use crate::Timestamp;
use crate::TokenInfo;
use crate::TokenStore;
use crate::WatchConfig;
use crate::DB_WATCHER_TOKEN_KEY;

pub struct Scheduler {
    config: WatchConfig,
    source: Arc<dyn ChangeSource>,
    store: Arc<dyn TokenStore>,
    oracle: Arc<dyn LeadershipOracle>,

    tasks: Vec<Task>,
    hints: CursorHints,

    stop: CancellationToken,
    started: bool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("tasks", &self.tasks.iter().map(|t| t.name.as_str()).collect::<Vec<_>>())
            .field("hints", &self.hints)
            .field("started", &self.started)
            .finish()
    }
}

impl Scheduler {
    pub fn new(
        config: WatchConfig,
        source: Arc<dyn ChangeSource>,
        store: Arc<dyn TokenStore>,
        oracle: Arc<dyn LeadershipOracle>,
    ) -> Self {
        Self {
            config,
            source,
            store,
            oracle,
            tasks: Vec::new(),
            hints: CursorHints::default(),
            stop: CancellationToken::new(),
            started: false,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Registers tasks under their unique names.
    ///
    /// Either every task is registered or, on a duplicate name, none is.
    pub fn add_tasks(
        &mut self,
        tasks: impl IntoIterator<Item = Task>,
    ) -> Result<()> {
        if self.started {
            return Err(SchedulerError::AlreadyStarted.into());
        }
        let tasks: Vec<Task> = tasks.into_iter().collect();

        let mut names: HashSet<&str> = self.tasks.iter().map(|t| t.name.as_str()).collect();
        for task in &tasks {
            if task.name == DB_WATCHER_TOKEN_KEY {
                return Err(SchedulerError::InvalidTask {
                    name: task.name.clone(),
                    reason: "task name is reserved for the database watermark".to_string(),
                }
                .into());
            }
            if !names.insert(task.name.as_str()) {
                return Err(SchedulerError::DuplicateTask(task.name.clone()).into());
            }
        }

        for task in tasks {
            self.hints.merge(task.majority_committed, task.max_await_time);
            debug!(task = %task.name, cold_start = task.needs_cold_start, "watch task registered");
            self.tasks.push(task);
        }
        Ok(())
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }

    /// Cursor options every database cursor is opened with.
    pub fn cursor_hints(&self) -> CursorHints {
        self.hints
    }

    /// Stop signal shared by every loop; cancelling it equals [`Scheduler::stop`].
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Starts watching every configured database.
    ///
    /// Fails without spawning anything when no task is registered, the topology
    /// does not resolve, or the token store cannot be read.
    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(SchedulerError::AlreadyStarted.into());
        }
        if self.tasks.is_empty() {
            return Err(SchedulerError::NoTasks.into());
        }
        let dbs = self.config.topology.resolve()?;
        let start_time = Timestamp::now();

        let mut prepared = Vec::with_capacity(dbs.len());
        for db in dbs {
            prepared.push(self.prepare_db(db, start_time).await?);
        }

        let mut handles = Vec::new();
        for db in prepared {
            self.spawn_db(db, &mut handles);
        }
        self.handles.lock().extend(handles);
        self.started = true;

        info!(tasks = self.tasks.len(), "watch scheduler started");
        Ok(())
    }

    /// Loads the committed positions of every task on `db` and opens the
    /// cold-start snapshot, if any task needs one.
    async fn prepare_db(
        &self,
        db: DbInfo,
        start_time: Timestamp,
    ) -> Result<PreparedDb> {
        let scheduler_config = &self.config.scheduler;
        let progress = ProgressSignal::new();

        let mut filter = MergedFilter::default();
        let mut cold_filter = MergedFilter::default();
        let mut tasks = Vec::with_capacity(self.tasks.len());
        let mut handles = Vec::with_capacity(self.tasks.len());

        for task in &self.tasks {
            let committed = match self.store.get(&db, &task.name).await? {
                Some(token) => token,
                None => {
                    // new consumers start from now rather than the whole history
                    let token = TokenInfo::start_at(start_time);
                    self.store.set(&db, &task.name, &token).await?;
                    info!(db = %db.uuid, task = %task.name, %token, "new consumer, starting from now");
                    token
                }
            };
            debug!(db = %db.uuid, task = %task.name, %committed, "consumer position loaded");

            filter.insert(task.name.clone(), task.filter.clone());
            if task.needs_cold_start {
                cold_filter.insert(task.name.clone(), task.filter.clone());
            }

            let (db_task, handle) = DbWatchTask::new(
                task.clone(),
                db.clone(),
                scheduler_config,
                self.config.retry,
                Arc::clone(&self.store),
                progress.clone(),
                committed,
            );
            tasks.push(db_task);
            handles.push(handle);
        }

        let cold_start = if cold_filter.is_empty() {
            None
        } else {
            let opts = ListOptions {
                page_size: scheduler_config.list_page_size,
                with_retry: true,
            };
            let snapshot = self.source.snapshot(&db, &cold_filter, &opts).await?;
            let cold_handles: Vec<TaskHandle> = handles.iter().filter(|h| h.needs_cold_start()).cloned().collect();
            for handle in &cold_handles {
                // provisional position: live events from the snapshot time on
                handle.set_committed(TokenInfo::start_at(snapshot.start_at));
            }
            info!(db = %db.uuid, start_at = %snapshot.start_at, tasks = cold_handles.len(), "cold start snapshot opened");

            let pump = ColdStart::new(
                db.clone(),
                cold_filter,
                cold_handles,
                Arc::clone(&self.source),
                opts,
                scheduler_config.rewatch_retry_delay(),
            );
            Some((pump, snapshot.rows))
        };

        let watcher = DbWatcher::new(
            db.clone(),
            filter,
            self.hints,
            handles,
            Arc::clone(&self.source),
            Arc::clone(&self.store),
            Arc::clone(&self.oracle),
            progress,
            scheduler_config.clone(),
        );

        Ok(PreparedDb {
            db,
            tasks,
            watcher,
            cold_start,
        })
    }

    fn spawn_db(
        &self,
        prepared: PreparedDb,
        handles: &mut Vec<JoinHandle<()>>,
    ) {
        let PreparedDb {
            db,
            tasks,
            watcher,
            cold_start,
        } = prepared;

        for task in tasks {
            let stop = self.stop.clone();
            let name = format!("task-{}-{}", db.uuid, task.id());
            spawn_task(&name, move || task.run(stop), Some(&mut *handles));
        }

        if let Some((pump, rows)) = cold_start {
            let stop = self.stop.clone();
            spawn_task(&format!("cold-start-{}", db.uuid), move || pump.run(rows, stop), Some(&mut *handles));
        }

        let stop = self.stop.clone();
        spawn_task(&format!("watcher-{}", db.uuid), move || watcher.run(stop), Some(&mut *handles));
    }

    /// Signals every loop to exit. Idempotent; in-flight batches are not
    /// committed.
    pub fn stop(&self) {
        if !self.stop.is_cancelled() {
            info!("watch scheduler stopping");
        }
        self.stop.cancel();
    }

    /// Waits for every spawned loop to exit.
    pub async fn join(&self) {
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("watch loop panicked: {:?}", e);
            }
        }
    }

    /// Stops and waits for every loop.
    pub async fn shutdown(&self) {
        self.stop();
        self.join().await;
    }
}

struct PreparedDb {
    db: DbInfo,
    tasks: Vec<DbWatchTask>,
    watcher: DbWatcher,
    cold_start: Option<(ColdStart, BoxStream<'static, Result<ChangeEvent>>)>,
}
