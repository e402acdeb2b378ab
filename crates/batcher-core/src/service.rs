//! Task-management operations exposed to the API layer.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::error::BatchError;
use crate::expand::{Dimension, combination_count, expand};
use crate::store::TaskStore;
use crate::task::{Combination, NewTask, Task, TaskConfig, TaskId, TaskStatus, TaskSummary};

/// Name given to tasks created without one.
pub const DEFAULT_TASK_NAME: &str = "Untitled task";

/// Page size of [`BatchService::list_tasks`] when none is given.
pub const DEFAULT_LIST_LIMIT: u32 = 50;

/// Largest page [`BatchService::list_tasks`] returns.
pub const MAX_LIST_LIMIT: u32 = 500;

#[derive(Debug, Clone, Copy)]
pub struct ExpansionLimits {
    /// Upper bound on combinations per task, checked before expanding.
    pub max_combinations: usize,
}

impl Default for ExpansionLimits {
    fn default() -> Self {
        Self {
            max_combinations: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CreatedTask {
    pub id: TaskId,
    pub total_count: usize,
}

pub struct BatchService<S> {
    store: Arc<S>,
    limits: ExpansionLimits,
}

impl<S> Clone for BatchService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            limits: self.limits,
        }
    }
}

impl<S: TaskStore> BatchService<S> {
    pub fn new(store: Arc<S>, limits: ExpansionLimits) -> Self {
        Self { store, limits }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn limits(&self) -> ExpansionLimits {
        self.limits
    }

    /// Expand `dimensions` against `target_id` without persisting anything.
    pub fn preview(
        &self,
        target_id: &str,
        dimensions: &[Dimension],
    ) -> Result<Vec<Combination>, BatchError> {
        self.check_limit(dimensions)?;
        Ok(expand(dimensions, target_id))
    }

    /// Expand and persist a new pending task.
    pub async fn create_task(
        &self,
        name: Option<&str>,
        template: Value,
        target_id: &str,
        dimensions: &[Dimension],
    ) -> Result<CreatedTask, BatchError> {
        let combinations = self.preview(target_id, dimensions)?;
        if combinations.is_empty() {
            return Err(BatchError::EmptyCombinations);
        }

        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_TASK_NAME)
            .to_owned();
        let total_count = combinations.len();
        let id = self
            .store
            .create(NewTask {
                name,
                config: TaskConfig {
                    template,
                    combinations,
                },
            })
            .await?;

        info!(task_id = id, total_count, "batch task created");
        Ok(CreatedTask { id, total_count })
    }

    /// One page of task summaries, newest first. `limit` defaults to
    /// [`DEFAULT_LIST_LIMIT`] and is clamped to `1..=MAX_LIST_LIMIT`.
    pub async fn list_tasks(
        &self,
        limit: Option<u32>,
        offset: u32,
    ) -> Result<Vec<TaskSummary>, BatchError> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        self.store.list(limit, offset).await
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Task, BatchError> {
        self.store.get(id).await?.ok_or(BatchError::NotFound(id))
    }

    /// Delete a task at any status. A running task is abandoned by the
    /// scheduler after its in-flight submission.
    pub async fn delete_task(&self, id: TaskId) -> Result<(), BatchError> {
        if !self.store.delete(id).await? {
            return Err(BatchError::NotFound(id));
        }
        info!(task_id = id, "batch task deleted");
        Ok(())
    }

    /// Make sure the task is queued: pending stays pending, terminal tasks
    /// start a fresh run, running tasks are refused.
    pub async fn run_task(&self, id: TaskId) -> Result<TaskStatus, BatchError> {
        let status = self.store.requeue(id).await?;
        info!(task_id = id, "batch task queued");
        Ok(status)
    }

    fn check_limit(&self, dimensions: &[Dimension]) -> Result<(), BatchError> {
        let limit = self.limits.max_combinations;
        match combination_count(dimensions) {
            Some(n) if n <= limit => Ok(()),
            _ => Err(BatchError::TooManyCombinations { limit }),
        }
    }
}
