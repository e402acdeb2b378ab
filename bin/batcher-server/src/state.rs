//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use batcher_core::{BatchService, SchedulerWaker, SqliteTaskStore};

use crate::config::Config;

/// State shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Task creation, listing and re-queueing.
    pub service: BatchService<SqliteTaskStore>,
    /// Nudges the scheduler after a task becomes pending. `None` when no
    /// scheduler runs in this process.
    pub waker: Option<SchedulerWaker>,
}

impl AppState {
    pub fn wake_scheduler(&self) {
        if let Some(waker) = &self.waker {
            waker.wake();
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("scheduler", &self.waker.is_some())
            .finish()
    }
}
