//! External task store consumed by the dynamic swarm.
//!
//! The swarm only needs two questions answered: which pending tasks are
//! worth picking up, and where to write status transitions. Both are
//! expressed by [`TaskStore`]; [`SqliteTaskStore`] is the production
//! backend and [`MemoryTaskStore`] serves tests and embedding.

pub mod memory;
pub mod sqlite;

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::task::{Task, TaskId, TaskStatus};
use crate::Result;

pub use memory::MemoryTaskStore;
pub use sqlite::SqliteTaskStore;

/// Boxed future returned by [`TaskStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A task together with its store-side bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredTask {
    /// The task payload.
    pub task: Task,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Workspace of the last execution.
    pub workspace_path: Option<String>,
    /// Artifacts of the last execution.
    pub artifacts: Vec<String>,
    /// Insert time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// Source of pending tasks and sink of status transitions.
pub trait TaskStore: Send + Sync {
    /// Pending tasks with `priority >= min_priority`, most urgent first,
    /// oldest first within a priority.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the backend query fails.
    fn pending_tasks(&self, min_priority: u8) -> StoreFuture<'_, Vec<Task>>;

    /// Move a task to `status`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the backend update fails and
    /// `AppError::NotFound` if the task is unknown.
    fn update_status<'a>(&'a self, task_id: &'a TaskId, status: TaskStatus)
        -> StoreFuture<'a, ()>;

    /// Remember where a task's execution left its artifacts.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the backend update fails.
    fn record_workspace<'a>(
        &'a self,
        task_id: &'a TaskId,
        workspace: &'a Path,
        artifacts: &'a [String],
    ) -> StoreFuture<'a, ()>;
}
