use batcher_core::{Combination, CombinationResult, Dimension, Task, TaskSummary};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

/// Paging of the task listing.
#[derive(Debug, Default, Deserialize, Validate, ToSchema, IntoParams)]
pub struct ListTasksQuery {
    /// Page size, 50 when omitted.
    #[validate(range(min = 1, max = 500))]
    pub limit: Option<u32>,
    /// Tasks to skip, newest first.
    #[serde(default)]
    pub offset: u32,
}

/// One varying parameter of a batch request.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct DimensionRequest {
    /// Field inside the target node; `/` separates an explicit path.
    #[validate(length(min = 1, max = 256))]
    pub field: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Value specification such as `"1-10:2,42"`.
    #[validate(length(max = 4096))]
    pub values: String,
    /// Overrides the request-level target for this dimension.
    #[serde(default)]
    #[validate(length(min = 1, max = 256))]
    pub target_id: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl From<DimensionRequest> for Dimension {
    fn from(d: DimensionRequest) -> Self {
        Dimension {
            field: d.field,
            enabled: d.enabled,
            values: d.values,
            target_id: d.target_id,
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateTaskRequest {
    #[serde(default)]
    #[validate(length(max = 200))]
    pub name: Option<String>,
    /// Job template handed to the engine with overrides applied.
    #[serde(alias = "workflow")]
    #[schema(value_type = Object)]
    pub template: Value,
    /// Node the dimensions apply to unless they name their own.
    #[serde(alias = "node_id")]
    #[validate(length(min = 1, max = 256))]
    pub target_id: String,
    #[validate(nested)]
    pub dimensions: Vec<DimensionRequest>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PreviewRequest {
    #[serde(alias = "node_id")]
    #[validate(length(min = 1, max = 256))]
    pub target_id: String,
    #[validate(nested)]
    pub dimensions: Vec<DimensionRequest>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateTaskResponse {
    pub id: i64,
    pub total_count: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PreviewResponse {
    pub total_count: usize,
    /// Ordered override sets, one per job.
    #[schema(value_type = Vec<Object>)]
    pub combinations: Vec<Combination>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RunTaskResponse {
    pub id: i64,
    pub status: String,
}

/// A task as listed, without template, combinations or results.
#[derive(Debug, Serialize, ToSchema)]
pub struct TaskSummaryResponse {
    pub id: i64,
    pub name: String,
    pub status: String,
    pub total_count: i64,
    pub completed_count: i64,
    pub failed_count: i64,
    pub progress: f64,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<TaskSummary> for TaskSummaryResponse {
    fn from(task: TaskSummary) -> Self {
        let progress = task.progress();
        TaskSummaryResponse {
            id: task.id,
            name: task.name,
            status: task.status.to_string(),
            total_count: task.total_count,
            completed_count: task.completed_count,
            failed_count: task.failed_count,
            progress,
            error_message: task.error_message,
            created_at: task.created_at.to_rfc3339(),
            updated_at: task.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CombinationResultResponse {
    /// Position in `combinations`.
    pub index: usize,
    /// `succeeded` or `failed`.
    pub status: String,
    pub error: Option<String>,
    pub finished_at: String,
}

impl From<CombinationResult> for CombinationResultResponse {
    fn from(r: CombinationResult) -> Self {
        CombinationResultResponse {
            index: r.index,
            status: r.status.to_string(),
            error: r.error,
            finished_at: r.finished_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TaskResponse {
    pub id: i64,
    pub name: String,
    pub status: String,
    #[schema(value_type = Object)]
    pub template: Value,
    #[schema(value_type = Vec<Object>)]
    pub combinations: Vec<Combination>,
    pub total_count: i64,
    pub completed_count: i64,
    pub failed_count: i64,
    pub progress: f64,
    pub error_message: Option<String>,
    /// Outcomes of the current run, by combination index.
    pub results: Vec<CombinationResultResponse>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        let progress = task.progress();
        TaskResponse {
            id: task.id,
            name: task.name,
            status: task.status.to_string(),
            template: task.config.template,
            combinations: task.config.combinations,
            total_count: task.total_count,
            completed_count: task.completed_count,
            failed_count: task.failed_count,
            progress,
            error_message: task.error_message,
            results: task.results.into_iter().map(Into::into).collect(),
            created_at: task.created_at.to_rfc3339(),
            updated_at: task.updated_at.to_rfc3339(),
        }
    }
}
