//! Durable per-consumer resume positions.
//!
//! One row per (watch db, database, consumer key). Each consumer only ever
//! writes its own row, so implementations only need to be safe for
//! concurrent writers on distinct keys.

mod memory_token_store;
mod sled_token_store;

pub use memory_token_store::*;
pub use sled_token_store::*;


use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::DbInfo;
use crate::Result;
use crate::TokenInfo;

/// Reserved consumer key of the database-level watermark row written by the
/// database watcher.
pub const DB_WATCHER_TOKEN_KEY: &str = "__db_watcher__";

#[cfg_attr(test, automock)]
#[async_trait]
pub trait TokenStore: Send + Sync + 'static {
    /// Returns `None` if the consumer never stored a position on this database.
    async fn get(
        &self,
        db: &DbInfo,
        consumer: &str,
    ) -> Result<Option<TokenInfo>>;

    /// Upserts the consumer's position.
    async fn set(
        &self,
        db: &DbInfo,
        consumer: &str,
        token: &TokenInfo,
    ) -> Result<()>;
}

pub(crate) fn token_key(
    db: &DbInfo,
    consumer: &str,
) -> String {
    format!("{}:{}", db.uuid, consumer)
}
