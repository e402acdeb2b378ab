//! SQLite implementation of [`TaskStore`].
//!
//! Uses [`sqlx`] with the `sqlite` feature. Migrations are run automatically
//! on startup via [`SqliteTaskStore::connect`].
//!
//! # Migrations path
//!
//! `sqlx::migrate!("./migrations")` resolves the path **at compile time**
//! relative to `CARGO_MANIFEST_DIR` (the crate root), so the directory is
//! embedded into the binary.
//!
//! # Atomicity
//!
//! Every task state change is scoped to one row and guarded by the expected
//! current status (`WHERE id = ? AND status = 'running'`). The claim uses
//! `UPDATE … WHERE id = (SELECT … LIMIT 1) RETURNING …`, so two callers can
//! never receive the same task. Writes that also touch `batch_task_results`
//! run in one transaction whose first statement is the guarded update.
//!
//! The `sqlx::query` (runtime-verified) form is used so that no
//! `DATABASE_URL` environment variable is needed at compile time.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use super::{RecoveryPolicy, TaskStore};
use crate::error::BatchError;
use crate::task::{
    CombinationResult, NewTask, ResultStatus, Task, TaskConfig, TaskId, TaskStatus, TaskSummary,
};

/// Default pool size for file-backed databases.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 4;

/// Error message stored on tasks failed by [`RecoveryPolicy::Fail`].
pub const INTERRUPTED_MESSAGE: &str = "interrupted: the service restarted while the task was running";

const TASK_COLUMNS: &str = "id, name, status, config, total_count, completed_count, failed_count, error_msg, created_at, updated_at";

type TaskRow = (
    i64,
    String,
    String,
    String,
    i64,
    i64,
    i64,
    Option<String>,
    String,
    String,
);

type SummaryRow = (i64, String, String, i64, i64, i64, Option<String>, String, String);

type ResultRow = (i64, String, Option<String>, String);

/// SQLite-backed batch task store.
#[derive(Clone, Debug)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    /// Open (or create) the SQLite database at `url` and run pending migrations.
    ///
    /// `url` should be a sqlx-compatible SQLite URL, e.g. `"sqlite://batcher.db"`
    /// or `"sqlite::memory:"` for tests.
    pub async fn connect(url: &str) -> Result<Self, BatchError> {
        Self::connect_with(url, DEFAULT_MAX_CONNECTIONS).await
    }

    /// Like [`Self::connect`] with an explicit pool size.
    ///
    /// An in-memory database lives and dies with its connection, so the pool
    /// is pinned to a single connection that is never recycled.
    pub async fn connect_with(url: &str, max_connections: u32) -> Result<Self, BatchError> {
        let in_memory = url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .min_connections(1)
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = pool_options.connect_with(options).await?;
        // Path is resolved relative to CARGO_MANIFEST_DIR at compile time.
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    async fn status_of(&self, id: TaskId) -> Result<Option<TaskStatus>, BatchError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT status FROM batch_tasks WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|(status,)| parse_status(id, &status)).transpose()
    }
}

fn parse_status(id: TaskId, raw: &str) -> Result<TaskStatus, BatchError> {
    TaskStatus::from_str(raw).map_err(|_| BatchError::InvalidRecord {
        task_id: id,
        reason: format!("unknown status '{raw}'"),
    })
}

fn parse_timestamp(id: TaskId, column: &str, raw: &str) -> Result<DateTime<Utc>, BatchError> {
    raw.parse().map_err(|e: chrono::ParseError| BatchError::InvalidRecord {
        task_id: id,
        reason: format!("bad {column} '{raw}': {e}"),
    })
}

fn into_result(task_id: TaskId, row: ResultRow) -> Result<CombinationResult, BatchError> {
    let (idx, status, error, finished_at) = row;
    let index = usize::try_from(idx).map_err(|_| BatchError::InvalidRecord {
        task_id,
        reason: format!("negative result index {idx}"),
    })?;
    let status = ResultStatus::from_str(&status).map_err(|_| BatchError::InvalidRecord {
        task_id,
        reason: format!("unknown result status '{status}'"),
    })?;
    Ok(CombinationResult {
        index,
        status,
        error,
        finished_at: parse_timestamp(task_id, "finished_at", &finished_at)?,
    })
}

fn into_task(row: TaskRow, results: Vec<CombinationResult>) -> Result<Task, BatchError> {
    let (
        id,
        name,
        status,
        config,
        total_count,
        completed_count,
        failed_count,
        error_message,
        created_at,
        updated_at,
    ) = row;
    let config: TaskConfig = serde_json::from_str(&config).map_err(|e| BatchError::InvalidRecord {
        task_id: id,
        reason: format!("undecodable config: {e}"),
    })?;
    Ok(Task {
        id,
        name,
        status: parse_status(id, &status)?,
        config,
        total_count,
        completed_count,
        failed_count,
        error_message,
        results,
        created_at: parse_timestamp(id, "created_at", &created_at)?,
        updated_at: parse_timestamp(id, "updated_at", &updated_at)?,
    })
}

fn into_summary(row: SummaryRow) -> Result<TaskSummary, BatchError> {
    let (id, name, status, total_count, completed_count, failed_count, error_message, created_at, updated_at) =
        row;
    Ok(TaskSummary {
        id,
        name,
        status: parse_status(id, &status)?,
        total_count,
        completed_count,
        failed_count,
        error_message,
        created_at: parse_timestamp(id, "created_at", &created_at)?,
        updated_at: parse_timestamp(id, "updated_at", &updated_at)?,
    })
}

/// Upsert the outcome of combination `index`; indexes past `total` are ignored.
async fn put_result(
    conn: &mut SqliteConnection,
    task_id: TaskId,
    index: i64,
    total: i64,
    status: ResultStatus,
    error: Option<&str>,
    at: &str,
) -> Result<(), BatchError> {
    if index < 0 || index >= total {
        return Ok(());
    }
    let status: &'static str = status.into();
    sqlx::query(
        "INSERT INTO batch_task_results (task_id, idx, status, error, finished_at) VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT (task_id, idx) DO UPDATE SET status = excluded.status, error = excluded.error, \
         finished_at = excluded.finished_at",
    )
    .bind(task_id)
    .bind(index)
    .bind(status)
    .bind(error)
    .bind(at)
    .execute(conn)
    .await?;
    Ok(())
}

impl TaskStore for SqliteTaskStore {
    async fn create(&self, task: NewTask) -> Result<TaskId, BatchError> {
        if task.config.combinations.is_empty() {
            return Err(BatchError::EmptyCombinations);
        }
        let total_count = task.config.combinations.len() as i64;
        let config = serde_json::to_string(&task.config)?;
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO batch_tasks (name, status, config, total_count, completed_count, failed_count, created_at, updated_at) \
             VALUES (?1, 'pending', ?2, ?3, 0, 0, ?4, ?4)",
        )
        .bind(&task.name)
        .bind(&config)
        .bind(total_count)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, BatchError> {
        // One read transaction so the row and its results come from the same snapshot.
        let mut tx = self.pool.begin().await?;
        let row: Option<TaskRow> =
            sqlx::query_as(&format!("SELECT {TASK_COLUMNS} FROM batch_tasks WHERE id = ?1"))
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let results: Vec<ResultRow> = sqlx::query_as(
            "SELECT idx, status, error, finished_at FROM batch_task_results WHERE task_id = ?1 ORDER BY idx ASC",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let results = results
            .into_iter()
            .map(|r| into_result(id, r))
            .collect::<Result<Vec<_>, _>>()?;
        into_task(row, results).map(Some)
    }

    async fn list(&self, limit: u32, offset: u32) -> Result<Vec<TaskSummary>, BatchError> {
        let rows: Vec<SummaryRow> = sqlx::query_as(
            "SELECT id, name, status, total_count, completed_count, failed_count, error_msg, created_at, updated_at \
             FROM batch_tasks ORDER BY id DESC LIMIT ?1 OFFSET ?2",
        )
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(into_summary).collect()
    }

    async fn delete(&self, id: TaskId) -> Result<bool, BatchError> {
        // Results go with the row through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM batch_tasks WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn claim_next_pending(&self) -> Result<Option<Task>, BatchError> {
        let now = Utc::now().to_rfc3339();
        let row: Option<TaskRow> = sqlx::query_as(&format!(
            "UPDATE batch_tasks SET status = 'running', updated_at = ?1 \
             WHERE id = (SELECT id FROM batch_tasks WHERE status = 'pending' ORDER BY id ASC LIMIT 1) \
             AND status = 'pending' \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(&now)
        .fetch_optional(&self.pool)
        .await?;
        if let Some((id, ..)) = &row {
            debug!(task_id = *id, "claimed pending task");
        }
        // A pending task starts with no results.
        row.map(|r| into_task(r, Vec::new())).transpose()
    }

    async fn record_progress(&self, id: TaskId, index: usize, increment: u32) -> Result<bool, BatchError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        let total: Option<(i64,)> = sqlx::query_as(
            "UPDATE batch_tasks SET completed_count = MIN(completed_count + ?1, total_count), updated_at = ?2 \
             WHERE id = ?3 AND status = 'running' \
             RETURNING total_count",
        )
        .bind(i64::from(increment))
        .bind(&now)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((total,)) = total else {
            return Ok(false);
        };

        let first = index as i64;
        for idx in first..first + i64::from(increment) {
            put_result(&mut *tx, id, idx, total, ResultStatus::Succeeded, None, &now).await?;
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn record_failure(&self, id: TaskId, index: usize, reason: &str) -> Result<bool, BatchError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        let total: Option<(i64,)> = sqlx::query_as(
            "UPDATE batch_tasks SET completed_count = MIN(completed_count + 1, total_count), \
             failed_count = MIN(failed_count + 1, total_count), error_msg = ?1, updated_at = ?2 \
             WHERE id = ?3 AND status = 'running' \
             RETURNING total_count",
        )
        .bind(reason)
        .bind(&now)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((total,)) = total else {
            return Ok(false);
        };

        put_result(&mut *tx, id, index as i64, total, ResultStatus::Failed, Some(reason), &now).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn fail_combination(&self, id: TaskId, index: usize, reason: &str) -> Result<bool, BatchError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        let total: Option<(i64,)> = sqlx::query_as(
            "UPDATE batch_tasks SET status = 'failed', error_msg = ?1, updated_at = ?2 \
             WHERE id = ?3 AND status = 'running' \
             RETURNING total_count",
        )
        .bind(reason)
        .bind(&now)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((total,)) = total else {
            return Ok(false);
        };

        put_result(&mut *tx, id, index as i64, total, ResultStatus::Failed, Some(reason), &now).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn finish(
        &self,
        id: TaskId,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<bool, BatchError> {
        if !status.is_terminal() {
            return Err(BatchError::InvalidTransition {
                task_id: id,
                from: TaskStatus::Running,
                to: status,
            });
        }
        let column: &'static str = status.into();
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE batch_tasks SET status = ?1, error_msg = COALESCE(?2, error_msg), updated_at = ?3 \
             WHERE id = ?4 AND status = 'running'",
        )
        .bind(column)
        .bind(error)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn requeue(&self, id: TaskId) -> Result<TaskStatus, BatchError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE batch_tasks SET status = 'pending', completed_count = 0, failed_count = 0, \
             error_msg = NULL, updated_at = ?1 \
             WHERE id = ?2 AND status IN ('completed', 'failed')",
        )
        .bind(&now)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() > 0 {
            sqlx::query("DELETE FROM batch_task_results WHERE task_id = ?1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(TaskStatus::Pending);
        }
        tx.rollback().await?;

        match self.status_of(id).await? {
            None => Err(BatchError::NotFound(id)),
            Some(TaskStatus::Pending) => Ok(TaskStatus::Pending),
            Some(TaskStatus::Running) => Err(BatchError::AlreadyRunning(id)),
            // Finished between the two statements; the caller may simply retry.
            Some(other) => Err(BatchError::InvalidTransition {
                task_id: id,
                from: other,
                to: TaskStatus::Pending,
            }),
        }
    }

    async fn reconcile_running(&self, policy: RecoveryPolicy) -> Result<u64, BatchError> {
        let now = Utc::now().to_rfc3339();
        match policy {
            RecoveryPolicy::Keep => Ok(0),
            RecoveryPolicy::Fail => {
                let result = sqlx::query(
                    "UPDATE batch_tasks SET status = 'failed', error_msg = ?1, updated_at = ?2 \
                     WHERE status = 'running'",
                )
                .bind(INTERRUPTED_MESSAGE)
                .bind(&now)
                .execute(&self.pool)
                .await?;
                Ok(result.rows_affected())
            }
            RecoveryPolicy::Requeue => {
                let mut tx = self.pool.begin().await?;
                sqlx::query(
                    "DELETE FROM batch_task_results \
                     WHERE task_id IN (SELECT id FROM batch_tasks WHERE status = 'running')",
                )
                .execute(&mut *tx)
                .await?;
                let result = sqlx::query(
                    "UPDATE batch_tasks SET status = 'pending', completed_count = 0, failed_count = 0, \
                     error_msg = NULL, updated_at = ?1 \
                     WHERE status = 'running'",
                )
                .bind(&now)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                Ok(result.rows_affected())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::task::{Combination, Override};

    async fn memory_store() -> SqliteTaskStore {
        SqliteTaskStore::connect("sqlite::memory:")
            .await
            .expect("in-memory store")
    }

    fn new_task(name: &str, combos: usize) -> NewTask {
        NewTask {
            name: name.to_owned(),
            config: TaskConfig {
                template: json!({ "3": { "inputs": { "seed": 0 } } }),
                combinations: (0..combos)
                    .map(|i| Combination(vec![Override::new("3", "seed", i as i64)]))
                    .collect(),
            },
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = memory_store().await;
        let id = store.create(new_task("sweep", 3)).await.unwrap();

        let task = store.get(id).await.unwrap().expect("task exists");
        assert_eq!(task.name, "sweep");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.total_count, 3);
        assert_eq!(task.completed_count, 0);
        assert_eq!(task.config.combinations.len(), 3);
        assert_eq!(task.config.combinations[2].0[0].value, json!(2));
        assert_eq!(task.error_message, None);
    }

    #[tokio::test]
    async fn empty_task_is_rejected_and_not_persisted() {
        let store = memory_store().await;
        let err = store.create(new_task("empty", 0)).await.unwrap_err();
        assert!(matches!(err, BatchError::EmptyCombinations));
        assert!(store.list(50, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn claim_serves_oldest_pending_first() {
        let store = memory_store().await;
        let first = store.create(new_task("a", 1)).await.unwrap();
        let second = store.create(new_task("b", 1)).await.unwrap();

        let claimed = store.claim_next_pending().await.unwrap().expect("a pending task");
        assert_eq!(claimed.id, first);
        assert_eq!(claimed.status, TaskStatus::Running);

        let claimed = store.claim_next_pending().await.unwrap().expect("b pending task");
        assert_eq!(claimed.id, second);

        assert!(store.claim_next_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_claims_hand_out_a_task_once() {
        let store = std::sync::Arc::new(memory_store().await);
        store.create(new_task("only", 2)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = std::sync::Arc::clone(&store);
            handles.push(tokio::spawn(async move { store.claim_next_pending().await }));
        }
        let mut claimed = 0;
        for h in handles {
            if h.await.unwrap().unwrap().is_some() {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
    }

    #[tokio::test]
    async fn progress_is_clamped_and_needs_a_running_task() {
        let store = memory_store().await;
        let id = store.create(new_task("p", 2)).await.unwrap();

        // Not claimed yet.
        assert!(!store.record_progress(id, 0, 1).await.unwrap());

        store.claim_next_pending().await.unwrap();
        assert!(store.record_progress(id, 0, 1).await.unwrap());
        assert!(store.record_progress(id, 1, 5).await.unwrap());

        let task = store.get(id).await.unwrap().unwrap();
        assert_eq!(task.completed_count, 2);
        assert!(task.updated_at >= task.created_at);
        // Indexes past the end are not recorded.
        let indexes: Vec<_> = task.results.iter().map(|r| r.index).collect();
        assert_eq!(indexes, vec![0, 1]);
    }

    #[tokio::test]
    async fn updates_against_a_deleted_task_are_no_ops() {
        let store = memory_store().await;
        let id = store.create(new_task("gone", 3)).await.unwrap();
        store.claim_next_pending().await.unwrap();

        assert!(store.delete(id).await.unwrap());
        assert!(!store.delete(id).await.unwrap());

        assert!(!store.record_progress(id, 0, 1).await.unwrap());
        assert!(!store.record_failure(id, 1, "boom").await.unwrap());
        assert!(!store.fail_combination(id, 2, "boom").await.unwrap());
        assert!(!store.finish(id, TaskStatus::Completed, None).await.unwrap());
        assert!(store.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn finish_only_accepts_terminal_statuses() {
        let store = memory_store().await;
        let id = store.create(new_task("f", 1)).await.unwrap();
        store.claim_next_pending().await.unwrap();

        let err = store.finish(id, TaskStatus::Pending, None).await.unwrap_err();
        assert!(matches!(err, BatchError::InvalidTransition { .. }));

        assert!(store.finish(id, TaskStatus::Failed, Some("engine exploded")).await.unwrap());
        let task = store.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_message.as_deref(), Some("engine exploded"));

        // Terminal tasks are not finished twice.
        assert!(!store.finish(id, TaskStatus::Completed, None).await.unwrap());
    }

    #[tokio::test]
    async fn record_failure_counts_towards_completion() {
        let store = memory_store().await;
        let id = store.create(new_task("c", 3)).await.unwrap();
        store.claim_next_pending().await.unwrap();

        store.record_progress(id, 0, 1).await.unwrap();
        store.record_failure(id, 1, "bad seed").await.unwrap();

        let task = store.get(id).await.unwrap().unwrap();
        assert_eq!(task.completed_count, 2);
        assert_eq!(task.failed_count, 1);
        assert_eq!(task.error_message.as_deref(), Some("bad seed"));

        assert_eq!(task.results.len(), 2);
        assert_eq!(task.results[0].status, ResultStatus::Succeeded);
        assert_eq!(task.results[0].error, None);
        assert_eq!(task.results[1].index, 1);
        assert_eq!(task.results[1].status, ResultStatus::Failed);
        assert_eq!(task.results[1].error.as_deref(), Some("bad seed"));
    }

    #[tokio::test]
    async fn requeue_follows_task_status() {
        let store = memory_store().await;
        let id = store.create(new_task("r", 2)).await.unwrap();

        assert_eq!(store.requeue(id).await.unwrap(), TaskStatus::Pending);

        store.claim_next_pending().await.unwrap();
        assert!(matches!(
            store.requeue(id).await.unwrap_err(),
            BatchError::AlreadyRunning(_)
        ));

        store.record_failure(id, 0, "x").await.unwrap();
        store.finish(id, TaskStatus::Failed, None).await.unwrap();
        assert_eq!(store.requeue(id).await.unwrap(), TaskStatus::Pending);

        let task = store.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.completed_count, 0);
        assert_eq!(task.failed_count, 0);
        assert_eq!(task.error_message, None);
        assert!(task.results.is_empty());

        assert!(matches!(
            store.requeue(id + 100).await.unwrap_err(),
            BatchError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn reconcile_marks_stale_running_tasks() {
        let store = memory_store().await;
        let stale = store.create(new_task("stale", 1)).await.unwrap();
        let queued = store.create(new_task("queued", 1)).await.unwrap();
        store.claim_next_pending().await.unwrap();

        assert_eq!(store.reconcile_running(RecoveryPolicy::Keep).await.unwrap(), 0);
        assert_eq!(store.reconcile_running(RecoveryPolicy::Fail).await.unwrap(), 1);

        let task = store.get(stale).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));
        assert_eq!(
            store.get(queued).await.unwrap().unwrap().status,
            TaskStatus::Pending
        );
    }

    #[tokio::test]
    async fn reconcile_requeue_puts_running_tasks_back() {
        let store = memory_store().await;
        let id = store.create(new_task("stale", 2)).await.unwrap();
        store.claim_next_pending().await.unwrap();
        store.record_progress(id, 0, 1).await.unwrap();

        assert_eq!(store.reconcile_running(RecoveryPolicy::Requeue).await.unwrap(), 1);
        let task = store.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.completed_count, 0);
        assert!(task.results.is_empty());
    }

    #[tokio::test]
    async fn list_is_newest_first_and_paged() {
        let store = memory_store().await;
        let mut ids = Vec::new();
        for name in ["a", "b", "c", "d", "e"] {
            ids.push(store.create(new_task(name, 1)).await.unwrap());
        }
        ids.reverse();

        let page: Vec<_> = store.list(2, 0).await.unwrap().iter().map(|t| t.id).collect();
        assert_eq!(page, ids[..2].to_vec());
        let page: Vec<_> = store.list(2, 2).await.unwrap().iter().map(|t| t.id).collect();
        assert_eq!(page, ids[2..4].to_vec());
        let page: Vec<_> = store.list(50, 4).await.unwrap().iter().map(|t| t.id).collect();
        assert_eq!(page, ids[4..].to_vec());

        let summary = &store.list(1, 0).await.unwrap()[0];
        assert_eq!(summary.name, "e");
        assert_eq!(summary.status, TaskStatus::Pending);
        assert_eq!(summary.total_count, 1);
    }

    #[tokio::test]
    async fn fail_combination_fails_the_task_without_counting_it() {
        let store = memory_store().await;
        let id = store.create(new_task("ff", 5)).await.unwrap();
        store.claim_next_pending().await.unwrap();
        store.record_progress(id, 0, 1).await.unwrap();
        store.record_progress(id, 1, 1).await.unwrap();

        assert!(store.fail_combination(id, 2, "sampler crashed").await.unwrap());
        let task = store.get(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.completed_count, 2);
        assert_eq!(task.failed_count, 0);
        assert_eq!(task.error_message.as_deref(), Some("sampler crashed"));
        let outcomes: Vec<_> = task.results.iter().map(|r| (r.index, r.status)).collect();
        assert_eq!(
            outcomes,
            vec![
                (0, ResultStatus::Succeeded),
                (1, ResultStatus::Succeeded),
                (2, ResultStatus::Failed)
            ]
        );

        // Only running tasks can be failed this way.
        assert!(!store.fail_combination(id, 3, "again").await.unwrap());
    }

    #[tokio::test]
    async fn deleting_a_task_drops_its_results() {
        let store = memory_store().await;
        let id = store.create(new_task("d", 2)).await.unwrap();
        store.claim_next_pending().await.unwrap();
        store.record_progress(id, 0, 2).await.unwrap();

        assert!(store.delete(id).await.unwrap());
        let (left,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM batch_task_results WHERE task_id = ?1")
            .bind(id)
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(left, 0);
    }

    #[tokio::test]
    async fn corrupt_timestamp_is_an_invalid_record() {
        let store = memory_store().await;
        let id = store.create(new_task("t", 1)).await.unwrap();
        sqlx::query("UPDATE batch_tasks SET updated_at = 'yesterday' WHERE id = ?1")
            .bind(id)
            .execute(&store.pool)
            .await
            .unwrap();

        let err = store.get(id).await.unwrap_err();
        match err {
            BatchError::InvalidRecord { task_id, reason } => {
                assert_eq!(task_id, id);
                assert!(reason.contains("updated_at"), "got {reason}");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(matches!(
            store.list(10, 0).await.unwrap_err(),
            BatchError::InvalidRecord { .. }
        ));
    }
}
