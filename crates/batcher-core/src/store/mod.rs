//! Task persistence layer.
//!
//! [`TaskStore`] defines the contract the scheduler and the service rely on.
//! The default implementation is [`sqlite::SqliteTaskStore`]. To swap to
//! another database, implement [`TaskStore`] for the new type and change the
//! concrete type where the service and scheduler are constructed.
//!
//! Every mutating method is atomic with respect to concurrent callers, and
//! the progress/finish methods report `false` instead of failing when the task
//! was deleted (or is no longer running) underneath the caller. Counters and
//! per-combination results always change together.
//!
//! All trait methods use `impl Future` in their signatures so no extra
//! `async-trait` crate is required.

pub mod sqlite;

use std::future::Future;

use strum::{Display, EnumString};

use crate::error::BatchError;
use crate::task::{NewTask, Task, TaskId, TaskStatus, TaskSummary};

pub use sqlite::SqliteTaskStore;

/// What to do with tasks found `running` when the service starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum RecoveryPolicy {
    /// Mark them `failed` with an "interrupted" error message.
    Fail,
    /// Put them back to `pending` as a fresh run.
    Requeue,
    /// Leave them alone.
    Keep,
}

pub trait TaskStore: Send + Sync + 'static {
    /// Persist a new `pending` task and return its id.
    ///
    /// Fails with [`BatchError::EmptyCombinations`] if the task has nothing to
    /// run; such tasks are never written.
    fn create(&self, task: NewTask) -> impl Future<Output = Result<TaskId, BatchError>> + Send;

    /// A task with its combinations and the results of its current run.
    fn get(&self, id: TaskId) -> impl Future<Output = Result<Option<Task>, BatchError>> + Send;

    /// At most `limit` task summaries, newest first, skipping `offset`.
    fn list(
        &self,
        limit: u32,
        offset: u32,
    ) -> impl Future<Output = Result<Vec<TaskSummary>, BatchError>> + Send;

    /// Remove a task at any status. Returns `false` if it did not exist.
    fn delete(&self, id: TaskId) -> impl Future<Output = Result<bool, BatchError>> + Send;

    /// Atomically move the oldest `pending` task to `running` and return it.
    fn claim_next_pending(&self) -> impl Future<Output = Result<Option<Task>, BatchError>> + Send;

    /// Add `increment` to `completed_count` (clamped at `total_count`) of a
    /// running task and mark combinations `index..index + increment` as
    /// succeeded. Returns `false` if there is no such running task.
    fn record_progress(
        &self,
        id: TaskId,
        index: usize,
        increment: u32,
    ) -> impl Future<Output = Result<bool, BatchError>> + Send;

    /// Count the combination at `index` of a running task as failed and keep
    /// its reason, both on the result and as the task's last error.
    fn record_failure(
        &self,
        id: TaskId,
        index: usize,
        reason: &str,
    ) -> impl Future<Output = Result<bool, BatchError>> + Send;

    /// Fail a running task at the combination `index`: the result is marked
    /// failed and the task moves to `failed` with `reason`. `completed_count`
    /// is left alone. Returns `false` if there is no such running task.
    fn fail_combination(
        &self,
        id: TaskId,
        index: usize,
        reason: &str,
    ) -> impl Future<Output = Result<bool, BatchError>> + Send;

    /// Move a running task to a terminal status. Returns `false` if there is
    /// no such running task.
    fn finish(
        &self,
        id: TaskId,
        status: TaskStatus,
        error: Option<&str>,
    ) -> impl Future<Output = Result<bool, BatchError>> + Send;

    /// Make a task eligible for claiming again and return its resulting
    /// status. Terminal tasks start a fresh run (counters, error and results
    /// cleared); pending tasks are left as is.
    fn requeue(&self, id: TaskId) -> impl Future<Output = Result<TaskStatus, BatchError>> + Send;

    /// Apply `policy` to every task currently marked `running`; returns how
    /// many rows were touched.
    fn reconcile_running(
        &self,
        policy: RecoveryPolicy,
    ) -> impl Future<Output = Result<u64, BatchError>> + Send;
}
