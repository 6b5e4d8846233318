use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use super::ResumeToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    Insert,
    Update,
    Replace,
    Delete,
    /// The source invalidated the cursor; it has to be reopened
    Invalidate,
    /// A row read by a cold-start snapshot
    Snapshot,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Replace => "replace",
            OperationKind::Delete => "delete",
            OperationKind::Invalidate => "invalidate",
            OperationKind::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical database a set of consumers is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DbInfo {
    pub uuid: String,
    /// Watch database holding the token rows of this database
    pub watch_db: String,
}

impl DbInfo {
    pub fn new(
        uuid: impl Into<String>,
        watch_db: impl Into<String>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            watch_db: watch_db.into(),
        }
    }
}

/// One change as read from a database cursor, before it is routed to any task.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub operation: OperationKind,
    pub collection: String,
    pub document: Arc<Value>,
    pub token: ResumeToken,
    /// Durable position in the source log
    pub position: u64,
}

impl ChangeEvent {
    pub fn tag(
        &self,
        db_uuid: &str,
        task_id: &str,
    ) -> Event {
        Event {
            operation: self.operation,
            db_uuid: db_uuid.to_string(),
            task_id: task_id.to_string(),
            collection: self.collection.clone(),
            document: Arc::clone(&self.document),
            token: self.token.clone(),
            position: self.position,
        }
    }
}

/// A change routed to one consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub operation: OperationKind,
    pub db_uuid: String,
    pub task_id: String,
    pub collection: String,
    pub document: Arc<Value>,
    pub token: ResumeToken,
    pub position: u64,
}

impl fmt::Display for Event {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "{}/{} {} {}.{} token={} op-time={}",
            self.db_uuid, self.task_id, self.operation, self.collection, self.position, self.token.data, self.token.cluster_time
        )
    }
}
