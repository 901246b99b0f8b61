//! Completed task results and the bounded ring buffer that retains them.

use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::Task;

/// Final outcome of one execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    /// The child reported success.
    Completed,
    /// The child reported failure, crashed, could not spawn, or was killed.
    Failed,
    /// The watchdog terminated the child.
    TimedOut,
}

/// Outcome of one task, retained after its slot has moved on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CompletedResult {
    /// Slot (or execution ordinal) that ran the task.
    pub slot_index: usize,
    /// The task itself; `task.id` is the correlation key.
    pub task: Task,
    /// Outcome classification.
    pub status: CompletionStatus,
    /// Solver output or diagnostic.
    pub result: String,
    /// Artifact paths relative to the workspace.
    pub artifacts: Vec<String>,
    /// Workspace the artifacts live in.
    pub workspace: PathBuf,
    /// When the execution left `Running`.
    pub finished_at: DateTime<Utc>,
}

/// Fixed-capacity FIFO of completed results; the oldest entry is evicted
/// when a push would exceed capacity.
#[derive(Debug, Clone)]
pub struct CompletedResults {
    capacity: usize,
    entries: VecDeque<CompletedResult>,
}

impl CompletedResults {
    /// Create an empty buffer. A capacity of zero is treated as one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a result, returning the evicted entry if the buffer was full.
    pub fn push(&mut self, result: CompletedResult) -> Option<CompletedResult> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(result);
        evicted
    }

    /// Number of retained results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no results are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &CompletedResult> {
        self.entries.iter()
    }

    /// Most recent result for a task, if still retained.
    #[must_use]
    pub fn latest_for(&self, task_id: &str) -> Option<&CompletedResult> {
        self.entries
            .iter()
            .rev()
            .find(|r| r.task.id.as_str() == task_id)
    }

    /// Copy out every retained result, oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<CompletedResult> {
        self.entries.iter().cloned().collect()
    }
}
