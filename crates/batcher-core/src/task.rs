//! Batch task data model.
//!
//! A [`Task`] bundles an opaque job template with the ordered list of
//! override combinations produced by the [expander](crate::expand). The
//! scheduler walks the combinations one by one and keeps the counters in sync
//! with the [store](crate::store).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Unique identifier of a persisted batch task. Ids grow with creation order.
pub type TaskId = i64;

/// Lifecycle state of a batch task.
///
/// `pending -> running -> completed | failed`. Only `pending` and `running`
/// are pre-terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Returns `true` for `completed` and `failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Outcome of one combination within a run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Succeeded,
    Failed,
}

/// One `(target_id, field, value)` triple applied to the template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Override {
    pub target_id: String,
    pub field: String,
    pub value: serde_json::Value,
}

impl Override {
    pub fn new(
        target_id: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            field: field.into(),
            value: value.into(),
        }
    }
}

/// One unit of execution: an ordered override set, one triple per
/// participating dimension.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Combination(pub Vec<Override>);

impl Combination {
    pub fn overrides(&self) -> &[Override] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Persisted payload of a task: the template plus what to vary in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Opaque job-description document owned by the execution engine.
    pub template: serde_json::Value,
    pub combinations: Vec<Combination>,
}

/// Input to [`TaskStore::create`](crate::store::TaskStore::create).
#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub config: TaskConfig,
}

/// Terminal outcome of the combination at `index` in the current run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombinationResult {
    pub index: usize,
    pub status: ResultStatus,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

/// A batch task as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    pub config: TaskConfig,
    /// Fixed at creation to `config.combinations.len()`.
    pub total_count: i64,
    /// Combinations that reached a terminal outcome in the current run.
    pub completed_count: i64,
    /// Subset of `completed_count` that failed (continue-on-failure only).
    pub failed_count: i64,
    /// Last failure reason, kept for diagnostics.
    pub error_message: Option<String>,
    /// Combinations that reached an outcome in the current run, by index.
    pub results: Vec<CombinationResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Fraction of combinations done, in `0.0..=1.0`.
    pub fn progress(&self) -> f64 {
        progress(self.completed_count, self.total_count)
    }
}

/// A task without its template, combinations and results, as listed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    pub total_count: i64,
    pub completed_count: i64,
    pub failed_count: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskSummary {
    pub fn progress(&self) -> f64 {
        progress(self.completed_count, self.total_count)
    }
}

fn progress(completed: i64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    completed as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn status_round_trips_through_column_text() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            let column: &'static str = status.into();
            assert_eq!(status.to_string(), column);
            assert_eq!(TaskStatus::from_str(column).unwrap(), status);
        }
        assert!(TaskStatus::from_str("interrupted").is_err());
    }

    #[test]
    fn result_status_uses_lowercase_names() {
        let column: &'static str = ResultStatus::Succeeded.into();
        assert_eq!(column, "succeeded");
        assert_eq!(ResultStatus::from_str("failed").unwrap(), ResultStatus::Failed);
        assert_eq!(serde_json::to_value(ResultStatus::Failed).unwrap(), "failed");
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn combination_serializes_as_plain_list_of_triples() {
        let combo = Combination(vec![Override::new("3", "seed", 1)]);
        let json = serde_json::to_value(&combo).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{ "target_id": "3", "field": "seed", "value": 1 }])
        );
    }
}
