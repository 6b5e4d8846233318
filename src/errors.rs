//! Watch Scheduler Error Hierarchy
//!
//! Only configuration and startup failures ever leave the scheduler. Every
//! steady-state error (cursor failures, token store hiccups, handler retries)
//! is logged and handled inside the watch loops.

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Task registration and scheduler lifecycle failures
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// Token store failures
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Change-feed adapter failures
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Watch task {0} already exists")]
    DuplicateTask(String),

    #[error("No watch task to start")]
    NoTasks,

    #[error("Scheduler already started")]
    AlreadyStarted,

    #[error("Invalid watch task {name}: {reason}")]
    InvalidTask { name: String, reason: String },

    /// The database has no watch database (explicit or default) that we know of
    #[error("Database {db} related watch db {watch_db} is invalid")]
    UnmappedDatabase { db: String, watch_db: String },

    #[error("No database to watch")]
    NoDatabases,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error(transparent)]
    Sled(#[from] sled::Error),

    /// Serialization failures for persisted token rows
    #[error(transparent)]
    Bincode(#[from] bincode::Error),

    #[error("Token store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Connection or cursor level failure; the watcher reopens the cursor
    #[error("Change cursor failed: {0}")]
    Cursor(String),

    /// The requested resume point is no longer present in the log
    #[error("Resume point {0} is no longer available in the change log")]
    HistoryLost(String),

    #[error("Snapshot read failed: {0}")]
    Snapshot(String),
}

impl SourceError {
    pub fn is_history_lost(&self) -> bool {
        matches!(self, SourceError::HistoryLost(_))
    }
}
