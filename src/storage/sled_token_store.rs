use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;
use tracing::warn;

use super::token_key;
use super::TokenStore;
use crate::DbInfo;
use crate::Result;
use crate::StorageError;
use crate::TokenInfo;

const WATCH_TOKEN_TREE_PREFIX: &str = "_watch_token_";

/// Token store persisting one sled tree per watch database, each row holding a
/// bincode encoded [`TokenInfo`].
#[derive(Clone)]
pub struct SledTokenStore {
    db: Arc<sled::Db>,
    trees: Arc<DashMap<String, sled::Tree>>,
}

impl std::fmt::Debug for SledTokenStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SledTokenStore")
            .field("trees", &self.trees.len())
            .finish()
    }
}

impl SledTokenStore {
    pub fn new(db: Arc<sled::Db>) -> Self {
        Self {
            db,
            trees: Arc::new(DashMap::new()),
        }
    }

    pub fn open(path: impl AsRef<Path> + std::fmt::Debug) -> Result<Self> {
        debug!("open sled token store from path: {:?}", &path);

        let db = sled::Config::default()
            .path(path.as_ref())
            .cache_capacity(10 * 1024 * 1024) //10MB
            .flush_every_ms(Some(3))
            .use_compression(true)
            .compression_factor(1)
            .open()
            .map_err(|e| {
                warn!("Try to open DB at this location: {:?} and failed: {:?}", path, e);
                StorageError::Sled(e)
            })?;
        Ok(Self::new(Arc::new(db)))
    }

    fn tree(
        &self,
        watch_db: &str,
    ) -> Result<sled::Tree> {
        if let Some(tree) = self.trees.get(watch_db) {
            return Ok(tree.clone());
        }
        let tree = self
            .db
            .open_tree(format!("{WATCH_TOKEN_TREE_PREFIX}{watch_db}"))
            .map_err(StorageError::Sled)?;
        self.trees.insert(watch_db.to_string(), tree.clone());
        Ok(tree)
    }
}

#[async_trait]
impl TokenStore for SledTokenStore {
    async fn get(
        &self,
        db: &DbInfo,
        consumer: &str,
    ) -> Result<Option<TokenInfo>> {
        let tree = self.tree(&db.watch_db)?;
        match tree.get(token_key(db, consumer)).map_err(StorageError::Sled)? {
            Some(ivec) => {
                let token = bincode::deserialize::<TokenInfo>(&ivec).map_err(StorageError::Bincode)?;
                Ok(Some(token))
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        db: &DbInfo,
        consumer: &str,
        token: &TokenInfo,
    ) -> Result<()> {
        let tree = self.tree(&db.watch_db)?;
        let value = bincode::serialize(token).map_err(StorageError::Bincode)?;
        tree.insert(token_key(db, consumer), value).map_err(StorageError::Sled)?;
        // A committed token must survive a crash before the consumer moves on
        tree.flush_async().await.map_err(StorageError::Sled)?;
        Ok(())
    }
}
