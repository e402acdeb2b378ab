use thiserror::Error;

use crate::task::{TaskId, TaskStatus};

/// Errors produced by the batcher core.
#[derive(Debug, Error)]
pub enum BatchError {
    /// Propagated from the SQLite (or other) store.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migrations failed to apply.
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// The stored task config could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No enabled dimension produced a value; nothing to run.
    #[error("no valid parameters: the expansion produced zero combinations")]
    EmptyCombinations,

    /// The expansion would exceed the configured upper bound.
    #[error("too many combinations: the expansion exceeds the limit of {limit}")]
    TooManyCombinations { limit: usize },

    /// The referenced task does not exist.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// The task is currently being executed and cannot be re-queued.
    #[error("task {0} is already running")]
    AlreadyRunning(TaskId),

    /// A status change that the task state machine does not allow.
    #[error("invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// A persisted row could not be turned back into a [`Task`](crate::task::Task).
    #[error("invalid task record {task_id}: {reason}")]
    InvalidRecord { task_id: TaskId, reason: String },
}

impl BatchError {
    /// Returns `true` for store errors that are worth retrying (lock
    /// contention, pool exhaustion, I/O hiccups).
    pub fn is_transient(&self) -> bool {
        match self {
            BatchError::Database(e) => match e {
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => {
                    true
                }
                sqlx::Error::Database(db) => {
                    // SQLITE_BUSY (5) and SQLITE_LOCKED (6), including extended codes.
                    db.code()
                        .and_then(|c| c.parse::<i64>().ok())
                        .map(|c| matches!(c & 0xff, 5 | 6))
                        .unwrap_or(false)
                }
                _ => false,
            },
            _ => false,
        }
    }
}
