use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Wall clock time since the unix epoch; a clock set before 1970 reads as zero
pub(crate) fn now_since_epoch() -> Duration {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
}
