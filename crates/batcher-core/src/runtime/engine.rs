//! The seam between the scheduler and whatever actually runs a job.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::document::JobDocument;

/// Engine-assigned identifier of one submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubmissionHandle(pub String);

impl SubmissionHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubmissionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Terminal outcome of a submission as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Succeeded,
    Failed { reason: String },
}

/// Failures talking to the engine. Any of these fails the combination.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("engine rejected the job: {0}")]
    Rejected(String),

    #[error("unexpected engine response: {0}")]
    Protocol(String),

    #[error("job {job_id} did not finish within {after:?}")]
    Timeout { job_id: String, after: Duration },
}

/// An external executor that accepts one job description at a time.
///
/// `submit` hands the job over and returns as soon as the engine has accepted
/// it; `wait` resolves once that job reached a terminal outcome. The scheduler
/// never has more than one handle outstanding.
pub trait ExecutionEngine: Send + Sync + 'static {
    fn submit(
        &self,
        job: &JobDocument,
    ) -> impl Future<Output = Result<SubmissionHandle, EngineError>> + Send;

    fn wait(
        &self,
        handle: &SubmissionHandle,
    ) -> impl Future<Output = Result<SubmissionOutcome, EngineError>> + Send;
}
