use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Coalescing "some consumer committed" flag raised by the task loops of one
/// database and consumed by its watcher. Any number of notifications before
/// the watcher looks collapse into one.
#[derive(Debug, Clone, Default)]
pub struct ProgressSignal {
    pending: Arc<AtomicBool>,
}

impl ProgressSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never blocks; a notification already pending absorbs this one.
    pub fn notify(&self) {
        self.pending.store(true, Ordering::Release);
    }

    /// Clears the pending flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }
}
