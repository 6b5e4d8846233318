use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::warn;

use crate::DbInfo;
use crate::Event;
use crate::OperationKind;

/// Consumer callback of a loop-batch or list-watch task.
///
/// Ordinary per-event failures (bad payloads and the like) are the handler's
/// own business: it logs and skips them. The return value only asks the
/// scheduler to retry the whole batch.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BatchHandler: Send + Sync + 'static {
    /// Returns true if the batch should be retried.
    async fn handle_batch(
        &self,
        db: &DbInfo,
        events: &[Event],
    ) -> bool;
}

/// Per-operation callbacks of a loop-one task. Each returns true to ask for a
/// retry.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn on_add(
        &self,
        db: &DbInfo,
        event: &Event,
    ) -> bool;

    async fn on_update(
        &self,
        db: &DbInfo,
        event: &Event,
    ) -> bool;

    async fn on_delete(
        &self,
        db: &DbInfo,
        event: &Event,
    ) -> bool;
}

/// Adapts an [`EventHandler`] to the batch interface.
pub struct LoopOneHandler<H> {
    inner: Arc<H>,
}

impl<H: EventHandler> LoopOneHandler<H> {
    pub fn new(inner: Arc<H>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<H: EventHandler> BatchHandler for LoopOneHandler<H> {
    async fn handle_batch(
        &self,
        db: &DbInfo,
        events: &[Event],
    ) -> bool {
        for event in events {
            let retry = match event.operation {
                OperationKind::Insert | OperationKind::Snapshot => self.inner.on_add(db, event).await,
                OperationKind::Update | OperationKind::Replace => self.inner.on_update(db, event).await,
                OperationKind::Delete => self.inner.on_delete(db, event).await,
                OperationKind::Invalidate => {
                    warn!(db = %db.uuid, task = %event.task_id, "skip invalidate event");
                    false
                }
            };
            if retry {
                return true;
            }
        }
        false
    }
}
