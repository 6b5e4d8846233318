use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Bounded retry policy of one task's handler
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct RetryOptions {
    /// Handler invocations allowed for one batch before the batch is committed
    /// anyway
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Backoff between two attempts (unit: milliseconds)
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl RetryOptions {
    pub fn new(
        max_attempts: usize,
        retry_interval: Duration,
    ) -> Self {
        Self {
            max_attempts,
            retry_interval_ms: retry_interval.as_millis() as u64,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config(ConfigError::Message(
                "max_attempts must be at least 1".into(),
            )));
        }
        Ok(())
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

fn default_max_attempts() -> usize {
    3
}
fn default_retry_interval_ms() -> u64 {
    1000
}
