use std::time::Duration;

use super::TokenInfo;

/// Options used to open one database cursor.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Resume point of the cursor, the watermark of all tasks on the database
    pub resume_from: TokenInfo,
    /// Only deliver majority committed changes
    pub majority_committed: bool,
    /// Longest time the source may wait before answering an empty poll
    pub max_await_time: Option<Duration>,
    /// Upper bound of events returned by one poll
    pub batch_size: usize,
}

/// Options used to read a cold-start snapshot.
#[derive(Debug, Clone)]
pub struct ListOptions {
    pub page_size: usize,
    /// Restart the snapshot from scratch when the row stream fails
    pub with_retry: bool,
}
