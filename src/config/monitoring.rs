use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitoringConfig {
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Default tracing filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Register the watch counters in the process registry
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}
impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            log_level: default_log_level(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}
impl MonitoringConfig {
    pub fn validate(&self) -> Result<()> {
        if self.log_dir.as_os_str().is_empty() {
            return Err(Error::Config(ConfigError::Message("log_dir cannot be empty".into())));
        }
        if self.log_level.trim().is_empty() {
            return Err(Error::Config(ConfigError::Message("log_level cannot be empty".into())));
        }
        Ok(())
    }
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_metrics_enabled() -> bool {
    true
}
