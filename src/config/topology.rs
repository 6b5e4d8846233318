use std::collections::HashSet;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::DbInfo;
use crate::Error;
use crate::Result;
use crate::SchedulerError;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub uuid: String,
    /// Watch database holding this database's tokens; falls back to
    /// `default_watch_db` when absent
    #[serde(default)]
    pub watch_db: Option<String>,
}

/// Physical databases to watch and the watch databases their tokens live in
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TopologyConfig {
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,

    #[serde(default)]
    pub watch_dbs: Vec<String>,

    #[serde(default)]
    pub default_watch_db: Option<String>,
}

impl TopologyConfig {
    pub fn validate(&self) -> Result<()> {
        let mut uuids = HashSet::new();
        for db in &self.databases {
            if db.uuid.is_empty() {
                return Err(Error::Config(ConfigError::Message(
                    "database uuid cannot be empty".into(),
                )));
            }
            if !uuids.insert(db.uuid.as_str()) {
                return Err(Error::Config(ConfigError::Message(format!(
                    "Duplicate database uuid {}",
                    db.uuid
                ))));
            }
        }
        Ok(())
    }

    /// Resolves every database to the watch database holding its tokens.
    ///
    /// A database without an explicit relation uses the default watch
    /// database; one whose watch database is unknown is a startup error.
    pub fn resolve(&self) -> Result<Vec<DbInfo>> {
        if self.databases.is_empty() {
            return Err(SchedulerError::NoDatabases.into());
        }

        let known: HashSet<&str> = self.watch_dbs.iter().map(String::as_str).collect();
        let mut resolved = Vec::with_capacity(self.databases.len());
        for db in &self.databases {
            let watch_db = match (&db.watch_db, &self.default_watch_db) {
                (Some(w), _) => w.clone(),
                (None, Some(default)) => {
                    warn!(db = %db.uuid, "db has no watch db, use default watch db {}", default);
                    default.clone()
                }
                (None, None) => String::new(),
            };

            if !known.contains(watch_db.as_str()) {
                return Err(SchedulerError::UnmappedDatabase {
                    db: db.uuid.clone(),
                    watch_db,
                }
                .into());
            }
            resolved.push(DbInfo::new(db.uuid.clone(), watch_db));
        }
        Ok(resolved)
    }
}
