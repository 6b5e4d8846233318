use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

/// Micro-batch accumulator: full at `max_batch_size`, due once
/// `batch_timeout` has elapsed since the previous flush.
#[derive(Debug)]
pub struct BatchBuffer<E> {
    pub(super) max_batch_size: usize,
    pub(super) batch_timeout: Duration,
    pub(super) buffer: VecDeque<E>,
    pub(super) last_flush: Instant,
}

impl<E> BatchBuffer<E> {
    pub fn new(
        max_batch_size: usize,
        batch_timeout: Duration,
    ) -> Self {
        let max_batch_size = max_batch_size.max(1);
        Self {
            max_batch_size,
            batch_timeout,
            buffer: VecDeque::with_capacity(max_batch_size),
            last_flush: Instant::now(),
        }
    }

    /// Returns the buffered length once the batch is full.
    pub fn push(
        &mut self,
        item: E,
    ) -> Option<usize> {
        self.buffer.push_back(item);
        trace!(max_batch_size = self.max_batch_size, len = self.buffer.len(), "batch buffer push");
        if self.buffer.len() >= self.max_batch_size {
            Some(self.buffer.len())
        } else {
            None
        }
    }

    pub fn should_flush(&self) -> bool {
        !self.buffer.is_empty() && self.last_flush.elapsed() >= self.batch_timeout
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn take(&mut self) -> Vec<E> {
        self.last_flush = Instant::now();
        std::mem::take(&mut self.buffer).into()
    }

    /// Drops everything buffered, e.g. when the cursor that produced it is
    /// abandoned.
    pub fn discard(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        self.last_flush = Instant::now();
        dropped
    }
}
