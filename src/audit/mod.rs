//! Pool event journal.
//!
//! Provides the [`AuditLogger`] trait and the [`PoolEvent`] record. The
//! primary implementation, [`JsonlAuditWriter`], appends JSONL records to
//! daily-rotating files. Journal failures are logged by the caller and
//! never change pool state.

pub mod writer;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::result::{CompletedResult, CompletionStatus};
use crate::models::task::TaskId;

/// Classification of a journal record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PoolEventKind {
    /// A slot or execution took a task.
    TaskAssigned,
    /// A task entered the overflow queue.
    TaskQueued,
    /// A task finished successfully.
    TaskCompleted,
    /// A task failed or was killed.
    TaskFailed,
    /// The watchdog terminated a task.
    TaskTimedOut,
    /// An operator approved a task's artifacts.
    TaskApproved,
    /// An operator rejected a task.
    TaskRejected,
    /// A slot was returned to idle.
    SlotReset,
}

/// One journal record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolEvent {
    /// Record time.
    pub timestamp: DateTime<Utc>,
    /// Event classification.
    pub kind: PoolEventKind,
    /// Task concerned, if any.
    pub task_id: Option<String>,
    /// Slot or execution ordinal, if any.
    pub slot_index: Option<usize>,
    /// Short human-readable outcome.
    pub detail: Option<String>,
}

impl PoolEvent {
    /// Construct a bare event.
    #[must_use]
    pub fn new(kind: PoolEventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            task_id: None,
            slot_index: None,
            detail: None,
        }
    }

    /// Event describing a recorded result.
    #[must_use]
    pub fn from_result(result: &CompletedResult) -> Self {
        let kind = match result.status {
            CompletionStatus::Completed => PoolEventKind::TaskCompleted,
            CompletionStatus::Failed => PoolEventKind::TaskFailed,
            CompletionStatus::TimedOut => PoolEventKind::TaskTimedOut,
        };
        let detail: String = result.result.chars().take(120).collect();
        Self::new(kind)
            .with_task(&result.task.id)
            .with_slot(result.slot_index)
            .with_detail(detail)
    }

    /// Set the task identifier.
    #[must_use]
    pub fn with_task(mut self, task_id: &TaskId) -> Self {
        self.task_id = Some(task_id.to_string());
        self
    }

    /// Set the slot index.
    #[must_use]
    pub fn with_slot(mut self, slot_index: usize) -> Self {
        self.slot_index = Some(slot_index);
        self
    }

    /// Set the detail text.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Writes pool events to a persistent journal.
///
/// Implementations must be [`Send`] and [`Sync`] to allow sharing across
/// async task boundaries via [`std::sync::Arc`].
pub trait AuditLogger: Send + Sync {
    /// Record a single event.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write operation fails.
    fn log_event(&self, event: PoolEvent) -> crate::Result<()>;
}

/// Record `event` if a journal is configured, logging any failure.
pub fn record(audit: Option<&Arc<dyn AuditLogger>>, event: PoolEvent) {
    if let Some(logger) = audit {
        let kind = event.kind;
        if let Err(err) = logger.log_event(event) {
            warn!(?kind, %err, "failed to write pool journal entry");
        }
    }
}

pub use writer::JsonlAuditWriter;
