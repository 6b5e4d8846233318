use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Timing and capacity parameters shared by every database watch loop
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// How often a streaming watcher asks the leadership oracle for its status
    #[serde(default = "default_leader_poll_interval_ms")]
    pub leader_poll_interval_ms: u64,

    /// How often a paused (not leader) watcher asks the leadership oracle
    #[serde(default = "default_follower_poll_interval_ms")]
    pub follower_poll_interval_ms: u64,

    /// Micro-batch tick: a non-empty buffer is flushed once this elapses
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Delay before a failed cursor is reopened from the latest watermark
    #[serde(default = "default_rewatch_retry_delay_ms")]
    pub rewatch_retry_delay_ms: u64,

    /// Unhandled event ceiling of one task queue; the queue holds one extra
    /// batch on top of it
    #[serde(default = "default_max_unhandled_events")]
    pub max_unhandled_events: usize,

    /// Batch size used by tasks that do not set their own
    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,

    /// Page size of cold-start snapshot reads
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            leader_poll_interval_ms: default_leader_poll_interval_ms(),
            follower_poll_interval_ms: default_follower_poll_interval_ms(),
            flush_interval_ms: default_flush_interval_ms(),
            rewatch_retry_delay_ms: default_rewatch_retry_delay_ms(),
            max_unhandled_events: default_max_unhandled_events(),
            default_batch_size: default_batch_size(),
            list_page_size: default_list_page_size(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        let positive_ms = [
            ("leader_poll_interval_ms", self.leader_poll_interval_ms),
            ("follower_poll_interval_ms", self.follower_poll_interval_ms),
            ("flush_interval_ms", self.flush_interval_ms),
            ("rewatch_retry_delay_ms", self.rewatch_retry_delay_ms),
        ];
        for (name, value) in positive_ms {
            if value == 0 {
                return Err(Error::Config(ConfigError::Message(format!(
                    "{name} must be at least 1ms"
                ))));
            }
        }

        if self.max_unhandled_events == 0 {
            return Err(Error::Config(ConfigError::Message(
                "max_unhandled_events must be greater than 0".into(),
            )));
        }
        if self.default_batch_size == 0 || self.list_page_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "default_batch_size and list_page_size must be greater than 0".into(),
            )));
        }
        Ok(())
    }

    pub fn leader_poll_interval(&self) -> Duration {
        Duration::from_millis(self.leader_poll_interval_ms)
    }

    pub fn follower_poll_interval(&self) -> Duration {
        Duration::from_millis(self.follower_poll_interval_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn rewatch_retry_delay(&self) -> Duration {
        Duration::from_millis(self.rewatch_retry_delay_ms)
    }

    /// Capacity of a task's live event queue
    pub fn queue_capacity(
        &self,
        batch_size: usize,
    ) -> usize {
        self.max_unhandled_events + batch_size
    }
}

fn default_leader_poll_interval_ms() -> u64 {
    50
}
fn default_follower_poll_interval_ms() -> u64 {
    1000
}
fn default_flush_interval_ms() -> u64 {
    50
}
fn default_rewatch_retry_delay_ms() -> u64 {
    1000
}
fn default_max_unhandled_events() -> usize {
    2000
}
fn default_batch_size() -> usize {
    200
}
fn default_list_page_size() -> usize {
    500
}
