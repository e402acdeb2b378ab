//! Parameter-sweep batch execution.
//!
//! [`expand`] turns dimension specifications into an ordered list of override
//! combinations, [`store`] persists batch tasks, and the [`runtime`]
//! scheduler feeds each combination to an external engine one job at a time.

pub mod document;
pub mod error;
pub mod expand;
pub mod runtime;
pub mod service;
pub mod store;
pub mod task;

pub use document::JobDocument;
pub use error::BatchError;
pub use expand::{Dimension, combination_count, expand, parse_values};
pub use runtime::admission::{AdmissionGate, Permit};
pub use runtime::engine::{EngineError, ExecutionEngine, SubmissionHandle, SubmissionOutcome};
pub use runtime::scheduler::{
    CycleOutcome, FailurePolicy, Scheduler, SchedulerConfig, SchedulerHandle, SchedulerWaker,
    TaskOutcome,
};
pub use service::{
    BatchService, CreatedTask, DEFAULT_LIST_LIMIT, ExpansionLimits, MAX_LIST_LIMIT,
};
pub use store::{RecoveryPolicy, SqliteTaskStore, TaskStore};
pub use task::{
    Combination, CombinationResult, NewTask, Override, ResultStatus, Task, TaskConfig, TaskId,
    TaskStatus, TaskSummary,
};
