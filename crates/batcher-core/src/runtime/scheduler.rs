use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use strum::{Display, EnumString};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::document::JobDocument;
use crate::error::BatchError;
use crate::runtime::admission::AdmissionGate;
use crate::runtime::engine::{ExecutionEngine, SubmissionOutcome};
use crate::store::TaskStore;
use crate::task::{Combination, Task, TaskId, TaskStatus};

/// What the scheduler does when one combination of a task fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
pub enum FailurePolicy {
    /// Fail the task at once; remaining combinations are not attempted.
    #[default]
    #[strum(to_string = "fail-fast")]
    FailFast,
    /// Record the failure and keep going; the task ends `failed` if any
    /// combination failed.
    #[strum(to_string = "continue", serialize = "continue-on-failure")]
    ContinueOnFailure,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
    pub failure_policy: FailurePolicy,
    /// Total attempts for one store call on transient errors.
    pub store_retry_attempts: u32,
    /// Backoff unit; attempt `n` waits `n * store_retry_backoff`.
    pub store_retry_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            failure_policy: FailurePolicy::FailFast,
            store_retry_attempts: 3,
            store_retry_backoff: Duration::from_millis(100),
        }
    }
}

/// How a claimed task left the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed,
    /// The task was deleted while running and has been abandoned.
    Vanished,
    /// Shutdown was requested between two combinations; the task stays
    /// `running` in the store.
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing was pending.
    Idle,
    Processed { task_id: TaskId, outcome: TaskOutcome },
}

/// A claimed task whose processing was cut short by a store error and that
/// still has to be moved out of `running`.
#[derive(Debug)]
struct Stranded {
    task_id: TaskId,
    reason: String,
}

/// The single batch worker.
///
/// Claims pending tasks in id order and walks their combinations one at a
/// time through the [`ExecutionEngine`], holding the [`AdmissionGate`] permit
/// for the whole lifetime of each submission.
///
/// A store error while a task is being processed fails that task; if even
/// that write fails, it is retried at the start of every following cycle
/// before anything new is claimed.
pub struct Scheduler<S, E> {
    store: Arc<S>,
    engine: Arc<E>,
    gate: AdmissionGate,
    config: SchedulerConfig,
    stranded: Mutex<Option<Stranded>>,
}

impl<S: TaskStore, E: ExecutionEngine> Scheduler<S, E> {
    pub fn new(store: Arc<S>, engine: Arc<E>, config: SchedulerConfig) -> Self {
        Self {
            store,
            engine,
            gate: AdmissionGate::single(),
            config,
            stranded: Mutex::new(None),
        }
    }

    /// Share an admission gate with other users of the same engine.
    pub fn with_gate(mut self, gate: AdmissionGate) -> Self {
        self.gate = gate;
        self
    }

    /// Spawn the worker loop and return the handle that owns it.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let wake = Arc::new(Notify::new());
        let loop_wake = Arc::clone(&wake);
        let join = tokio::spawn(async move {
            self.run_loop(shutdown_rx, loop_wake).await;
        });
        SchedulerHandle {
            shutdown: shutdown_tx,
            wake,
            join,
        }
    }

    async fn run_loop(self, mut shutdown: watch::Receiver<bool>, wake: Arc<Notify>) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            failure_policy = %self.config.failure_policy,
            "batch scheduler started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_cycle(&shutdown).await {
                // Drain the queue before sleeping again.
                Ok(CycleOutcome::Processed { .. }) => continue,
                Ok(CycleOutcome::Idle) => {}
                Err(e) => error!(error = %e, "scheduler cycle failed"),
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = wake.notified() => debug!("scheduler woken"),
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!("batch scheduler stopped");
    }

    /// Claim and fully process at most one task.
    pub async fn run_cycle(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<CycleOutcome, BatchError> {
        self.settle_stranded().await?;

        let claimed = self
            .with_store_retry("claim_next_pending", || self.store.claim_next_pending())
            .await?;
        let Some(task) = claimed else {
            debug!("no pending batch task");
            return Ok(CycleOutcome::Idle);
        };

        let task_id = task.id;
        info!(
            task_id,
            name = %task.name,
            total = task.total_count,
            "batch task claimed"
        );
        match self.process(task, shutdown).await {
            Ok(outcome) => Ok(CycleOutcome::Processed { task_id, outcome }),
            Err(e) => {
                error!(task_id, error = %e, "store error while processing task; failing it");
                self.set_stranded(Stranded {
                    task_id,
                    reason: format!("store error: {e}"),
                });
                if let Err(settle) = self.settle_stranded().await {
                    warn!(task_id, error = %settle, "could not fail task; retrying on the next poll");
                }
                Err(e)
            }
        }
    }

    /// Fail the task left `running` by an earlier store error, if any. The
    /// task stays pending settlement while the store keeps failing.
    async fn settle_stranded(&self) -> Result<(), BatchError> {
        let Some(stranded) = self.take_stranded() else {
            return Ok(());
        };
        let task_id = stranded.task_id;
        let reason = stranded.reason.as_str();
        let finished = self
            .with_store_retry("finish", || {
                self.store.finish(task_id, TaskStatus::Failed, Some(reason))
            })
            .await;
        match finished {
            Ok(true) => {
                warn!(task_id, reason, "batch task failed after a store error");
                Ok(())
            }
            Ok(false) => {
                debug!(task_id, "task is gone or no longer running; nothing to settle");
                Ok(())
            }
            Err(e) => {
                self.set_stranded(stranded);
                Err(e)
            }
        }
    }

    fn take_stranded(&self) -> Option<Stranded> {
        self.stranded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn set_stranded(&self, stranded: Stranded) {
        *self.stranded.lock().unwrap_or_else(PoisonError::into_inner) = Some(stranded);
    }

    async fn process(
        &self,
        task: Task,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<TaskOutcome, BatchError> {
        let task_id = task.id;
        let template = JobDocument::new(task.config.template);
        let combinations = task.config.combinations;
        let total = combinations.len();
        let mut last_failure: Option<String> = None;

        for (index, combination) in combinations.iter().enumerate() {
            if *shutdown.borrow() {
                info!(task_id, combination = index, "shutdown requested; task left running");
                return Ok(TaskOutcome::Interrupted);
            }

            let reason = match self.execute(task_id, index, &template, combination).await {
                Ok(()) => {
                    let recorded = self
                        .with_store_retry("record_progress", || {
                            self.store.record_progress(task_id, index, 1)
                        })
                        .await?;
                    if !recorded {
                        warn!(task_id, "batch task vanished while running; abandoning");
                        return Ok(TaskOutcome::Vanished);
                    }
                    continue;
                }
                Err(reason) => format!("combination {}/{} failed: {reason}", index + 1, total),
            };

            match self.config.failure_policy {
                FailurePolicy::FailFast => {
                    warn!(task_id, combination = index, error = %reason, "combination failed; failing task");
                    let failed = self
                        .with_store_retry("fail_combination", || {
                            self.store.fail_combination(task_id, index, &reason)
                        })
                        .await?;
                    if !failed {
                        warn!(task_id, "batch task vanished before it could finish; abandoning");
                        return Ok(TaskOutcome::Vanished);
                    }
                    info!(task_id, status = %TaskStatus::Failed, "batch task finished");
                    return Ok(TaskOutcome::Failed);
                }
                FailurePolicy::ContinueOnFailure => {
                    warn!(task_id, combination = index, error = %reason, "combination failed; continuing");
                    let recorded = self
                        .with_store_retry("record_failure", || {
                            self.store.record_failure(task_id, index, &reason)
                        })
                        .await?;
                    if !recorded {
                        warn!(task_id, "batch task vanished while running; abandoning");
                        return Ok(TaskOutcome::Vanished);
                    }
                    last_failure = Some(reason);
                }
            }
        }

        match last_failure {
            Some(reason) => self.finish(task_id, TaskStatus::Failed, Some(&reason)).await,
            None => self.finish(task_id, TaskStatus::Completed, None).await,
        }
    }

    /// Run one combination to its terminal outcome. `Err` carries the reason.
    async fn execute(
        &self,
        task_id: TaskId,
        index: usize,
        template: &JobDocument,
        combination: &Combination,
    ) -> Result<(), String> {
        let (job, missed) = template.with_overrides(combination);
        for ov in missed {
            warn!(
                task_id,
                combination = index,
                target_id = %ov.target_id,
                field = %ov.field,
                "override does not resolve in template; skipped"
            );
        }

        let Some(_permit) = self.gate.acquire().await else {
            return Err("admission gate closed".to_owned());
        };

        let handle = self.engine.submit(&job).await.map_err(|e| e.to_string())?;
        debug!(task_id, combination = index, job_id = %handle, "job submitted");

        match self.engine.wait(&handle).await {
            Ok(SubmissionOutcome::Succeeded) => {
                debug!(task_id, combination = index, job_id = %handle, "job succeeded");
                Ok(())
            }
            Ok(SubmissionOutcome::Failed { reason }) => Err(reason),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn finish(
        &self,
        task_id: TaskId,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<TaskOutcome, BatchError> {
        let finished = self
            .with_store_retry("finish", || self.store.finish(task_id, status, error))
            .await?;
        if !finished {
            warn!(task_id, "batch task vanished before it could finish; abandoning");
            return Ok(TaskOutcome::Vanished);
        }
        info!(task_id, status = %status, "batch task finished");
        Ok(match status {
            TaskStatus::Completed => TaskOutcome::Completed,
            _ => TaskOutcome::Failed,
        })
    }

    async fn with_store_retry<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, BatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BatchError>>,
    {
        let attempts = self.config.store_retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(op, attempt, error = %e, "transient store error; retrying");
                    tokio::time::sleep(self.config.store_retry_backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Cloneable trigger that cuts the scheduler's idle sleep short.
#[derive(Debug, Clone)]
pub struct SchedulerWaker(Arc<Notify>);

impl SchedulerWaker {
    pub fn wake(&self) {
        self.0.notify_one();
    }
}

/// Owns a running scheduler loop.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    wake: Arc<Notify>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Poll now instead of waiting for the next interval.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub fn waker(&self) -> SchedulerWaker {
        SchedulerWaker(Arc::clone(&self.wake))
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Ask the loop to exit after the current combination and wait for it.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "scheduler task ended abnormally");
        }
    }
}
