use std::fmt;

/// Per-database watch loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// Paused, no events pulled
    NotLeader,
    /// Draining the cursor
    LeaderStreaming,
    /// The cursor must be reopened from a freshly computed watermark
    RewatchPending,
}

impl fmt::Display for WatchState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            WatchState::NotLeader => "not-leader",
            WatchState::LeaderStreaming => "leader-streaming",
            WatchState::RewatchPending => "rewatch-pending",
        };
        f.write_str(s)
    }
}

/// Remembers the leadership flag of the previous poll.
#[derive(Debug, Default)]
pub struct LeaderObserver {
    previous: Option<bool>,
}

impl LeaderObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `is_leader` and returns true if it differs from the previous
    /// poll. The very first observation always counts as a change.
    pub fn observe(
        &mut self,
        is_leader: bool,
    ) -> bool {
        let changed = self.previous != Some(is_leader);
        self.previous = Some(is_leader);
        changed
    }

    /// State to enter after a poll in `current`.
    pub fn next_state(
        &mut self,
        current: WatchState,
        is_leader: bool,
    ) -> WatchState {
        if self.observe(is_leader) {
            WatchState::RewatchPending
        } else {
            current
        }
    }
}
