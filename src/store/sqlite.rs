//! `SQLite` task store backed by `sqlx`.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{info, warn};

use super::{StoreFuture, StoredTask, TaskStore};
use crate::models::task::{Task, TaskCategory, TaskId, TaskStatus};
use crate::{AppError, Result};

/// Task store over a `todos` table.
#[derive(Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct TodoRow {
    id: String,
    task: String,
    priority: i64,
    category: Option<String>,
    status: String,
    deadline: Option<String>,
    workspace_path: Option<String>,
    artifacts: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TodoRow {
    fn into_stored(self) -> Result<StoredTask> {
        let priority = u8::try_from(self.priority)
            .map_err(|_| AppError::Store(format!("invalid priority: {}", self.priority)))?;
        let mut task = Task::new(
            TaskId::parse(&self.id)?,
            self.task,
            TaskCategory::parse_lenient(self.category.as_deref().unwrap_or("other")),
            priority,
        )?;
        if let Some(raw) = self.deadline.as_deref().filter(|raw| !raw.is_empty()) {
            task = task.with_deadline(parse_time(raw, "deadline")?);
        }
        let artifacts = self
            .artifacts
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| AppError::Store(format!("invalid artifacts: {e}")))?
            .unwrap_or_default();

        Ok(StoredTask {
            task,
            status: TaskStatus::parse(&self.status)?,
            workspace_path: self.workspace_path,
            artifacts,
            created_at: parse_time(&self.created_at, "created_at")?,
            updated_at: parse_time(&self.updated_at, "updated_at")?,
        })
    }
}

fn parse_time(raw: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AppError::Store(format!("invalid {field}: {e}")))
}

impl SqliteTaskStore {
    /// Open (creating if needed) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the connection or schema bootstrap fails.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| AppError::Store(format!("failed to create db dir: {err}")))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        info!(path = %path.display(), "task store opened");
        Self::with_pool(pool).await
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the connection or schema bootstrap fails.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // One connection: every in-memory connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    /// Wrap an existing pool and bootstrap the schema.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the DDL fails.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        bootstrap_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// Insert a new pending task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the insert fails (for example on a
    /// duplicate id).
    pub async fn insert(&self, task: &Task) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO todos (id, task, priority, category, status, deadline,
             workspace_path, artifacts, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?5, NULL, NULL, ?6, ?6)",
        )
        .bind(task.id.as_str())
        .bind(&task.description)
        .bind(i64::from(task.priority))
        .bind(task.category.as_str())
        .bind(task.deadline.map(|d| d.to_rfc3339()))
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch one task with its bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the query fails or the row is invalid.
    pub async fn get(&self, task_id: &TaskId) -> Result<Option<StoredTask>> {
        let row: Option<TodoRow> = sqlx::query_as("SELECT * FROM todos WHERE id = ?1")
            .bind(task_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TodoRow::into_stored).transpose()
    }
}

impl TaskStore for SqliteTaskStore {
    fn pending_tasks(&self, min_priority: u8) -> StoreFuture<'_, Vec<Task>> {
        Box::pin(async move {
            let rows: Vec<TodoRow> = sqlx::query_as(
                "SELECT * FROM todos WHERE status = 'pending' AND priority >= ?1 \
                 ORDER BY priority DESC, created_at ASC, id ASC",
            )
            .bind(i64::from(min_priority))
            .fetch_all(&self.pool)
            .await?;

            let mut tasks = Vec::with_capacity(rows.len());
            for row in rows {
                let id = row.id.clone();
                match row.into_stored() {
                    Ok(stored) => tasks.push(stored.task),
                    Err(err) => warn!(task_id = id, %err, "skipping unreadable task row"),
                }
            }
            Ok(tasks)
        })
    }

    fn update_status<'a>(
        &'a self,
        task_id: &'a TaskId,
        status: TaskStatus,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let outcome = sqlx::query("UPDATE todos SET status = ?1, updated_at = ?2 WHERE id = ?3")
                .bind(status.as_str())
                .bind(Utc::now().to_rfc3339())
                .bind(task_id.as_str())
                .execute(&self.pool)
                .await?;
            if outcome.rows_affected() == 0 {
                return Err(AppError::NotFound(format!("task {task_id}")));
            }
            Ok(())
        })
    }

    fn record_workspace<'a>(
        &'a self,
        task_id: &'a TaskId,
        workspace: &'a Path,
        artifacts: &'a [String],
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let artifacts = serde_json::to_string(artifacts)?;
            sqlx::query(
                "UPDATE todos SET workspace_path = ?1, artifacts = ?2, updated_at = ?3 \
                 WHERE id = ?4",
            )
            .bind(workspace.to_string_lossy().into_owned())
            .bind(artifacts)
            .bind(Utc::now().to_rfc3339())
            .bind(task_id.as_str())
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }
}

/// Create the `todos` table idempotently.
///
/// # Errors
///
/// Returns `AppError::Store` if the DDL fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS todos (
    id              TEXT PRIMARY KEY NOT NULL,
    task            TEXT NOT NULL,
    priority        INTEGER NOT NULL CHECK(priority BETWEEN 1 AND 10),
    category        TEXT,
    status          TEXT NOT NULL CHECK(status IN ('pending','active','completed','failed','approved','rejected')),
    deadline        TEXT,
    workspace_path  TEXT,
    artifacts       TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_todos_status_priority ON todos(status, priority);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
