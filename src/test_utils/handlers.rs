use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::BatchHandler;
use crate::DbInfo;
use crate::Event;
use crate::EventHandler;

/// Records every batch it is handed and answers "retry" for the first
/// `failures` calls (`usize::MAX` for always).
#[derive(Debug, Default)]
pub struct RecordingHandler {
    batches: Mutex<Vec<Vec<Event>>>,
    failures: AtomicUsize,
    calls: AtomicUsize,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(failures: usize) -> Arc<Self> {
        let handler = Self::default();
        handler.failures.store(failures, Ordering::SeqCst);
        Arc::new(handler)
    }

    pub fn always_failing() -> Arc<Self> {
        Self::failing(usize::MAX)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn batches(&self) -> Vec<Vec<Event>> {
        self.batches.lock().clone()
    }

    /// Log positions of every handed event, in call order.
    pub fn positions(&self) -> Vec<u64> {
        self.batches.lock().iter().flatten().map(|e| e.position).collect()
    }
}

#[async_trait]
impl BatchHandler for RecordingHandler {
    async fn handle_batch(
        &self,
        _db: &DbInfo,
        events: &[Event],
    ) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batches.lock().push(events.to_vec());

        let left = self.failures.load(Ordering::SeqCst);
        if left == 0 {
            return false;
        }
        if left != usize::MAX {
            self.failures.store(left - 1, Ordering::SeqCst);
        }
        true
    }
}

/// Blocks every batch until [`GatedHandler::open`], then records it.
#[derive(Debug, Default)]
pub struct GatedHandler {
    open: AtomicBool,
    entered: AtomicUsize,
    inner: RecordingHandler,
}

impl GatedHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    /// Calls that reached the gate, including those still waiting.
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    pub fn positions(&self) -> Vec<u64> {
        self.inner.positions()
    }
}

#[async_trait]
impl BatchHandler for GatedHandler {
    async fn handle_batch(
        &self,
        db: &DbInfo,
        events: &[Event],
    ) -> bool {
        self.entered.fetch_add(1, Ordering::SeqCst);
        while !self.open.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        self.inner.handle_batch(db, events).await
    }
}

/// Records which callback saw which event position.
#[derive(Debug, Default)]
pub struct RecordingEventHandler {
    pub calls: Mutex<Vec<(&'static str, u64)>>,
}

#[async_trait]
impl EventHandler for RecordingEventHandler {
    async fn on_add(
        &self,
        _db: &DbInfo,
        event: &Event,
    ) -> bool {
        self.calls.lock().push(("add", event.position));
        false
    }

    async fn on_update(
        &self,
        _db: &DbInfo,
        event: &Event,
    ) -> bool {
        self.calls.lock().push(("update", event.position));
        false
    }

    async fn on_delete(
        &self,
        _db: &DbInfo,
        event: &Event,
    ) -> bool {
        self.calls.lock().push(("delete", event.position));
        false
    }
}
