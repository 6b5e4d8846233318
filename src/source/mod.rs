//! Event source adapter contract.
//!
//! A storage driver wraps one physical database's native change feed behind
//! [`ChangeSource`]. The scheduler owns exactly one [`ChangeCursor`] per
//! database at any time and never shares it.

mod memory;

pub use memory::*;


use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::ChangeEvent;
use crate::DbInfo;
use crate::ListOptions;
use crate::MergedFilter;
use crate::Result;
use crate::Timestamp;
use crate::WatchOptions;

#[derive(Debug)]
pub enum CursorPoll {
    Events(Vec<ChangeEvent>),
    /// Nothing arrived within the poll timeout
    Timeout,
}

#[async_trait]
pub trait ChangeCursor: Send {
    /// Waits at most `timeout` for the next events in log order.
    ///
    /// An error means the cursor is unusable and has to be reopened.
    async fn next(
        &mut self,
        timeout: Duration,
    ) -> Result<CursorPoll>;
}

/// A finite, lazily read full snapshot.
pub struct SnapshotStream {
    /// Captured before the first row is read; live events from this time on
    /// are not covered by the snapshot
    pub start_at: Timestamp,
    pub rows: BoxStream<'static, Result<ChangeEvent>>,
}

impl std::fmt::Debug for SnapshotStream {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SnapshotStream")
            .field("start_at", &self.start_at)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ChangeSource: Send + Sync + 'static {
    /// Opens a cursor over the changes matching `filter`, resuming from
    /// `opts.resume_from`.
    async fn open(
        &self,
        db: &DbInfo,
        filter: &MergedFilter,
        opts: &WatchOptions,
    ) -> Result<Box<dyn ChangeCursor>>;

    /// Starts a fresh snapshot of every document matching `filter`.
    async fn snapshot(
        &self,
        db: &DbInfo,
        filter: &MergedFilter,
        opts: &ListOptions,
    ) -> Result<SnapshotStream>;
}
