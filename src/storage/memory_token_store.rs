use async_trait::async_trait;
use dashmap::DashMap;

use super::token_key;
use super::TokenStore;
use crate::DbInfo;
use crate::Result;
use crate::TokenInfo;

/// Process-local token store, for tests and single-shot runs.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    // (watch db, "<db uuid>:<consumer>") -> token
    tokens: DashMap<(String, String), TokenInfo>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(
        &self,
        db: &DbInfo,
        consumer: &str,
    ) -> Result<Option<TokenInfo>> {
        let key = (db.watch_db.clone(), token_key(db, consumer));
        Ok(self.tokens.get(&key).map(|t| t.value().clone()))
    }

    async fn set(
        &self,
        db: &DbInfo,
        consumer: &str,
        token: &TokenInfo,
    ) -> Result<()> {
        let key = (db.watch_db.clone(), token_key(db, consumer));
        self.tokens.insert(key, token.clone());
        Ok(())
    }
}
