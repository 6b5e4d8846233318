//! Configuration management for the watch scheduler.
//!
//! Sources are merged with the following priority (later wins):
//! 1. Default values (hardcoded)
//! 2. File named by `CONFIG_PATH`
//! 3. Explicit override file ([`WatchConfig::with_override_config`])
//! 4. Environment variables prefixed `FEEDWATCH`, e.g.
//!    `FEEDWATCH__SCHEDULER__FLUSH_INTERVAL_MS=20`

mod monitoring;
mod retry;
mod scheduler;
mod storage;
mod topology;
pub use monitoring::*;
pub use retry::*;
pub use scheduler::*;
pub use storage::*;
pub use topology::*;


//---
use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

const ENV_PREFIX: &str = "FEEDWATCH";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct WatchConfig {
    /// Watch loop timing and queue capacities
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Default retry policy of tasks that do not carry their own
    #[serde(default)]
    pub retry: RetryOptions,
    /// Token store location
    #[serde(default)]
    pub storage: StorageConfig,
    /// Databases to watch
    #[serde(default)]
    pub topology: TopologyConfig,
    /// Logging and metrics
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl WatchConfig {
    /// Loads defaults, the `CONFIG_PATH` file if set, then environment
    /// overrides. Does not validate.
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies an override file on top of the current values; environment
    /// variables still win. Does not validate.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Loads and validates the configuration used by the binary.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = Self::new()?;
        if let Some(p) = path {
            config = config.with_override_config(p)?;
        }
        config.validate()
    }

    pub fn validate(self) -> Result<Self> {
        self.scheduler.validate()?;
        self.retry.validate()?;
        self.storage.validate()?;
        self.topology.validate()?;
        self.monitoring.validate()?;
        Ok(self)
    }
}
