use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use super::BatchHandler;
use super::EventHandler;
use super::EventValidator;
use super::LoopOneHandler;
use crate::NamespaceFilter;
use crate::OperationKind;
use crate::Result;
use crate::RetryOptions;
use crate::SchedulerError;
use crate::DB_WATCHER_TOKEN_KEY;

/// Immutable description of one logical consumer.
///
/// A task is bound to every watched database once the scheduler starts.
#[derive(Clone)]
pub struct Task {
    pub name: String,
    pub filter: NamespaceFilter,
    /// Falls back to the scheduler's default batch size
    pub batch_size: Option<usize>,
    /// Read a full snapshot before live events
    pub needs_cold_start: bool,
    /// Falls back to the scheduler's default retry policy
    pub retry: Option<RetryOptions>,
    pub majority_committed: bool,
    pub max_await_time: Option<Duration>,
    pub(crate) handler: Arc<dyn BatchHandler>,
    pub(crate) validator: Option<Arc<dyn EventValidator>>,
}

impl fmt::Debug for Task {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("filter", &self.filter)
            .field("batch_size", &self.batch_size)
            .field("needs_cold_start", &self.needs_cold_start)
            .field("retry", &self.retry)
            .field("majority_committed", &self.majority_committed)
            .field("max_await_time", &self.max_await_time)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

impl Task {
    pub fn builder(name: impl Into<String>) -> TaskBuilder {
        TaskBuilder::new(name)
    }
}

/// Fluent constructor of [`Task`].
///
/// ```ignore
/// let task = TaskBuilder::new("user-cache")
///     .collection("users")
///     .operations([OperationKind::Update, OperationKind::Delete])
///     .batch_size(100)
///     .handler(Arc::new(CacheInvalidator::default()))
///     .build()?;
/// ```
pub struct TaskBuilder {
    name: String,
    filter: Option<NamespaceFilter>,
    operations: Vec<OperationKind>,
    batch_size: Option<usize>,
    cold_start: bool,
    retry: Option<RetryOptions>,
    majority_committed: bool,
    max_await_time: Option<Duration>,
    handler: Option<Arc<dyn BatchHandler>>,
    validator: Option<Arc<dyn EventValidator>>,
    loop_one: bool,
}

impl TaskBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter: None,
            operations: Vec::new(),
            batch_size: None,
            cold_start: false,
            retry: None,
            majority_committed: false,
            max_await_time: None,
            handler: None,
            validator: None,
            loop_one: false,
        }
    }

    pub fn collection(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.filter = Some(NamespaceFilter::collection(name));
        self
    }

    pub fn collection_regex(
        mut self,
        re: Regex,
    ) -> Self {
        self.filter = Some(NamespaceFilter::collection_regex(re));
        self
    }

    pub fn operations(
        mut self,
        ops: impl IntoIterator<Item = OperationKind>,
    ) -> Self {
        self.operations = ops.into_iter().collect();
        self
    }

    pub fn batch_size(
        mut self,
        batch_size: usize,
    ) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn cold_start(
        mut self,
        enabled: bool,
    ) -> Self {
        self.cold_start = enabled;
        self
    }

    pub fn retry(
        mut self,
        retry: RetryOptions,
    ) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn majority_committed(
        mut self,
        enabled: bool,
    ) -> Self {
        self.majority_committed = enabled;
        self
    }

    pub fn max_await_time(
        mut self,
        max_await_time: Duration,
    ) -> Self {
        self.max_await_time = Some(max_await_time);
        self
    }

    pub fn validator(
        mut self,
        validator: Arc<dyn EventValidator>,
    ) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn handler(
        mut self,
        handler: Arc<dyn BatchHandler>,
    ) -> Self {
        self.handler = Some(handler);
        self.loop_one = false;
        self
    }

    /// Delivers events one at a time to per-operation callbacks.
    pub fn loop_one<H: EventHandler>(
        mut self,
        handler: Arc<H>,
    ) -> Self {
        self.handler = Some(Arc::new(LoopOneHandler::new(handler)));
        self.loop_one = true;
        self
    }

    pub fn build(self) -> Result<Task> {
        let invalid = |reason: &str| SchedulerError::InvalidTask {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("task name cannot be empty").into());
        }
        if self.name == DB_WATCHER_TOKEN_KEY {
            return Err(invalid("task name is reserved for the database watermark").into());
        }
        let Some(filter) = self.filter.clone() else {
            return Err(invalid("missing namespace filter").into());
        };
        let Some(handler) = self.handler.clone() else {
            return Err(invalid("missing handler").into());
        };

        let batch_size = match (self.loop_one, self.batch_size) {
            (_, Some(0)) => return Err(invalid("batch size must be greater than 0").into()),
            (true, Some(n)) if n > 1 => return Err(invalid("loop-one tasks handle one event per batch").into()),
            (true, _) => Some(1),
            (false, size) => size,
        };

        if let Some(retry) = &self.retry {
            if retry.max_attempts == 0 {
                return Err(invalid("max_attempts must be at least 1").into());
            }
        }

        let filter = if self.operations.is_empty() {
            filter
        } else {
            filter.with_operations(self.operations.iter().copied())
        };

        Ok(Task {
            name: self.name,
            filter,
            batch_size,
            needs_cold_start: self.cold_start,
            retry: self.retry,
            majority_committed: self.majority_committed,
            max_await_time: self.max_await_time,
            handler,
            validator: self.validator,
        })
    }
}
