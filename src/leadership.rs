//! Leadership oracle polled by every database watcher.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

#[cfg(test)]
use mockall::automock;

/// Answers whether this process instance currently owns the watch work.
///
/// Polled on a fixed interval, never pushed, so implementations must be cheap
/// and non-blocking.
#[cfg_attr(test, automock)]
pub trait LeadershipOracle: Send + Sync + 'static {
    fn is_leader(&self) -> bool;
}

/// Leadership flag flipped by the embedding process (or fixed for a single
/// instance deployment).
#[derive(Debug)]
pub struct StaticLeadership {
    leader: AtomicBool,
}

impl StaticLeadership {
    pub fn new(leader: bool) -> Self {
        Self {
            leader: AtomicBool::new(leader),
        }
    }

    pub fn set_leader(
        &self,
        leader: bool,
    ) {
        self.leader.store(leader, Ordering::SeqCst);
    }
}

impl Default for StaticLeadership {
    fn default() -> Self {
        Self::new(true)
    }
}

impl LeadershipOracle for StaticLeadership {
    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }
}
