//! batcher-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables.
//! 2. Initialise structured tracing (stdout or a daily rolling file).
//! 3. Open the SQLite database, run pending migrations and reconcile tasks
//!    left `running` by a previous process.
//! 4. Start the batch scheduler against the prompt-server engine.
//! 5. Build the Axum router and serve HTTP with graceful shutdown.
//! 6. Stop the scheduler once the server has drained.

mod config;
mod engine;
mod error;
mod middleware;
mod routes;
mod schemas;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use batcher_core::{BatchService, Scheduler, SqliteTaskStore, TaskStore};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use crate::config::Config;
use crate::engine::PromptEngine;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = init_tracing(&cfg);

    info!(version = env!("CARGO_PKG_VERSION"), "batcher-server starting");

    // ── 3. Database ────────────────────────────────────────────────────────────
    let store = Arc::new(SqliteTaskStore::connect_with(&cfg.database_url, cfg.db_max_connections).await?);
    info!(database_url = %cfg.database_url, "database ready");

    let reconciled = store.reconcile_running(cfg.recovery).await?;
    if reconciled > 0 {
        warn!(count = reconciled, policy = %cfg.recovery, "reconciled tasks left running by a previous process");
    }

    // ── 4. Scheduler ───────────────────────────────────────────────────────────
    let engine = Arc::new(PromptEngine::new(
        cfg.engine_url.clone(),
        cfg.engine_poll_interval,
        cfg.engine_timeout,
    )?);
    let scheduler = Scheduler::new(Arc::clone(&store), engine, cfg.scheduler()).start();
    info!(engine_url = %cfg.engine_url, "batch scheduler running");

    // ── 5. HTTP server with graceful shutdown ──────────────────────────────────
    let state = Arc::new(AppState {
        service: BatchService::new(Arc::clone(&store), cfg.limits()),
        waker: Some(scheduler.waker()),
        config: Arc::new(cfg.clone()),
    });

    let app = routes::build(state);
    let addr: SocketAddr = cfg.bind_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // ── 6. Scheduler shutdown ──────────────────────────────────────────────────
    // Returns once the in-flight combination (if any) has finished.
    scheduler.stop().await;

    info!("batcher-server stopped");
    Ok(())
}

/// Install the global subscriber. Returns the file writer guard when logging
/// to `BATCH_LOG_DIR`.
fn init_tracing(cfg: &Config) -> Option<WorkerGuard> {
    // Build the log-level filter, warning loudly if the configured value is
    // not a valid tracing filter expression.
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: BATCH_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    match &cfg.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "batcher-server.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let subscriber = subscriber.with_writer(writer).with_ansi(false);
            if cfg.log_json {
                subscriber.json().init();
            } else {
                subscriber.init();
            }
            Some(guard)
        }
        None => {
            if cfg.log_json {
                subscriber.json().init();
            } else {
                subscriber.init();
            }
            None
        }
    }
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
