use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::DbInfo;
use crate::MemoryTokenStore;
use crate::Result;
use crate::StorageError;
use crate::TokenInfo;
use crate::TokenStore;

/// Memory store that fails the next `n` writes and keeps a write journal.
#[derive(Debug, Default)]
pub struct FlakyTokenStore {
    inner: MemoryTokenStore,
    failing_sets: AtomicUsize,
    journal: Mutex<Vec<(String, String, TokenInfo)>>,
}

impl FlakyTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_sets(
        &self,
        n: usize,
    ) {
        self.failing_sets.store(n, Ordering::SeqCst);
    }

    /// Successful writes of `consumer` on `db`, oldest first.
    pub fn writes(
        &self,
        db: &str,
        consumer: &str,
    ) -> Vec<TokenInfo> {
        self.journal
            .lock()
            .iter()
            .filter(|(d, c, _)| d == db && c == consumer)
            .map(|(_, _, t)| t.clone())
            .collect()
    }
}

#[async_trait]
impl TokenStore for FlakyTokenStore {
    async fn get(
        &self,
        db: &DbInfo,
        consumer: &str,
    ) -> Result<Option<TokenInfo>> {
        self.inner.get(db, consumer).await
    }

    async fn set(
        &self,
        db: &DbInfo,
        consumer: &str,
        token: &TokenInfo,
    ) -> Result<()> {
        let failing = self.failing_sets.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_sets.store(failing - 1, Ordering::SeqCst);
            return Err(StorageError::Unavailable("injected failure".to_string()).into());
        }
        self.inner.set(db, consumer, token).await?;
        self.journal
            .lock()
            .push((db.uuid.clone(), consumer.to_string(), token.clone()));
        Ok(())
    }
}
