//! In-memory task store.

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use tokio::sync::Mutex;

use super::{StoreFuture, StoredTask, TaskStore};
use crate::models::task::{Task, TaskId, TaskStatus};
use crate::{AppError, Result};

/// Task store kept in a process-local map.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: Mutex<HashMap<TaskId, StoredTask>>,
}

impl MemoryTaskStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new pending task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AlreadyActive` if the id is already present.
    pub async fn insert(&self, task: Task) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(&task.id) {
            return Err(AppError::AlreadyActive(format!("task {} already stored", task.id)));
        }
        let now = Utc::now();
        tasks.insert(
            task.id.clone(),
            StoredTask {
                task,
                status: TaskStatus::Pending,
                workspace_path: None,
                artifacts: Vec::new(),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    /// Fetch one task with its bookkeeping.
    pub async fn get(&self, task_id: &TaskId) -> Option<StoredTask> {
        self.tasks.lock().await.get(task_id).cloned()
    }

    /// Current status of a task.
    pub async fn status_of(&self, task_id: &TaskId) -> Option<TaskStatus> {
        self.tasks.lock().await.get(task_id).map(|stored| stored.status)
    }
}

impl TaskStore for MemoryTaskStore {
    fn pending_tasks(&self, min_priority: u8) -> StoreFuture<'_, Vec<Task>> {
        Box::pin(async move {
            let tasks = self.tasks.lock().await;
            let mut pending: Vec<&StoredTask> = tasks
                .values()
                .filter(|s| s.status == TaskStatus::Pending && s.task.priority >= min_priority)
                .collect();
            pending.sort_by(|a, b| {
                b.task
                    .priority
                    .cmp(&a.task.priority)
                    .then(a.created_at.cmp(&b.created_at))
                    .then_with(|| a.task.id.cmp(&b.task.id))
            });
            Ok(pending.into_iter().map(|s| s.task.clone()).collect())
        })
    }

    fn update_status<'a>(
        &'a self,
        task_id: &'a TaskId,
        status: TaskStatus,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut tasks = self.tasks.lock().await;
            let stored = tasks
                .get_mut(task_id)
                .ok_or_else(|| AppError::NotFound(format!("task {task_id}")))?;
            stored.status = status;
            stored.updated_at = Utc::now();
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
            let mut tasks = self.tasks.lock().await;
            if let Some(stored) = tasks.get_mut(task_id) {
                stored.workspace_path = Some(workspace.to_string_lossy().into_owned());
                stored.artifacts = artifacts.to_vec();
                stored.updated_at = Utc::now();
            }
            Ok(())
        })
    }
}
