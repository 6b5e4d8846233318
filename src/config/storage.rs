use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory of the sled database holding resume tokens
    #[serde(default = "default_token_db_path")]
    pub token_db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            token_db_path: default_token_db_path(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.token_db_path.as_os_str().is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "token_db_path cannot be empty".into(),
            )));
        }
        Ok(())
    }
}

fn default_token_db_path() -> PathBuf {
    PathBuf::from("./db/watch_token")
}
