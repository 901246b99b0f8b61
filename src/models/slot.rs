//! Execution slot status and its read-only projection.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::{TaskCategory, TaskId};

/// Lifecycle status of an execution slot.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    /// No task bound.
    #[default]
    Idle,
    /// A child process is working on the bound task.
    Running,
    /// The child reported completion.
    Done,
    /// Spawn failure, crash, kill, or timeout.
    Failed,
}

impl SlotStatus {
    /// Whether the status is `Done` or `Failed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Length of the result preview carried in snapshots.
pub const RESULT_PREVIEW_CHARS: usize = 200;

/// Read-only projection of one slot for status consumers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct SlotSnapshot {
    /// Slot position within the pool (execution ordinal in dynamic mode).
    pub slot_index: usize,
    /// Current status.
    pub status: SlotStatus,
    /// Bound task, if any.
    pub task_id: Option<TaskId>,
    /// Bound task description.
    pub description: Option<String>,
    /// Bound task category.
    pub category: Option<TaskCategory>,
    /// Bound task priority.
    pub priority: Option<u8>,
    /// Workspace of the current assignment.
    pub workspace: Option<PathBuf>,
    /// Assignment time.
    pub started_at: Option<DateTime<Utc>>,
    /// Time the slot left `Running`.
    pub finished_at: Option<DateTime<Utc>>,
    /// Seconds since assignment (until finish while terminal).
    pub elapsed_seconds: f64,
    /// Whether a child process is alive.
    pub running: bool,
    /// OS process id of the current child.
    pub pid: Option<u32>,
    /// Total bytes of output produced so far.
    pub output_position: usize,
    /// First characters of the result.
    pub result_preview: String,
}
