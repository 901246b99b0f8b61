//! Task program rendering.
//!
//! A [`TaskScript`] turns one [`Task`] into a self-contained
//! [`TaskProgram`]: the category system prompt, the user prompt embedding
//! the payload, the solver endpoint, and the handoff paths. The program is
//! written to `program.json` and executed by the child runner, which calls
//! the solver and reports back through the handoff protocol.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SolverConfig;
use crate::handoff::{LOG_FILE, PROGRAM_FILE, SOLUTION_FILE, STATUS_FILE};
use crate::mode::ExecutionMode;
use crate::models::task::Task;
use crate::{AppError, Result};

pub mod prompts;

/// Rendered, self-contained program for one task execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct TaskProgram {
    /// Task payload.
    pub task: Task,
    /// System prompt chosen by category.
    pub system_prompt: String,
    /// User prompt embedding the task.
    pub user_prompt: String,
    /// Solver the child calls.
    pub solver: SolverConfig,
    /// Whether the child streams to stdout or reports through files only.
    pub execution_mode: ExecutionMode,
    /// CPU-time cap the child applies to itself; `None` disables it.
    pub cpu_limit_seconds: Option<u64>,
    /// Workspace the child runs in.
    pub workspace: PathBuf,
    /// Status document path.
    pub status_path: PathBuf,
    /// Progress log path.
    pub log_path: PathBuf,
    /// Primary artifact path.
    pub solution_path: PathBuf,
    /// Render time.
    pub rendered_at: DateTime<Utc>,
}

impl TaskProgram {
    /// Write the program to `<workspace>/program.json`, returning the path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the workspace is not writable.
    pub async fn write(&self) -> Result<PathBuf> {
        let path = self.workspace.join(PROGRAM_FILE);
        let body = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(&path, body).await.map_err(|err| {
            AppError::Io(format!("failed to write {}: {err}", path.display()))
        })?;
        Ok(path)
    }

    /// Load a program previously written by [`write`](Self::write).
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the file is missing and
    /// `AppError::Io` if it is not a valid program.
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

/// Builder for a [`TaskProgram`].
#[derive(Debug, Clone)]
pub struct TaskScript {
    task: Task,
    solver: SolverConfig,
    execution_mode: ExecutionMode,
    cpu_limit_seconds: u64,
}

impl TaskScript {
    /// Start a script for `task` with the default solver, streaming mode,
    /// and no CPU cap.
    #[must_use]
    pub fn new(task: Task) -> Self {
        Self {
            task,
            solver: SolverConfig::default(),
            execution_mode: ExecutionMode::Streaming,
            cpu_limit_seconds: 0,
        }
    }

    /// Solver the child calls.
    #[must_use]
    pub fn solver(mut self, solver: SolverConfig) -> Self {
        self.solver = solver;
        self
    }

    /// Output capture mode.
    #[must_use]
    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    /// CPU-time cap; only applied in batch mode, 0 disables it.
    #[must_use]
    pub fn cpu_limit_seconds(mut self, seconds: u64) -> Self {
        self.cpu_limit_seconds = seconds;
        self
    }

    /// Render the program for execution inside `workspace`.
    #[must_use]
    pub fn render(self, workspace: &Path) -> TaskProgram {
        let cpu_limit_seconds = (self.execution_mode == ExecutionMode::Batch
            && self.cpu_limit_seconds > 0)
            .then_some(self.cpu_limit_seconds);

        TaskProgram {
            system_prompt: prompts::system_prompt(self.task.category).to_owned(),
            user_prompt: prompts::user_prompt(&self.task),
            task: self.task,
            solver: self.solver,
            execution_mode: self.execution_mode,
            cpu_limit_seconds,
            workspace: workspace.to_path_buf(),
            status_path: workspace.join(STATUS_FILE),
            log_path: workspace.join(LOG_FILE),
            solution_path: workspace.join(SOLUTION_FILE),
            rendered_at: Utc::now(),
        }
    }
}
