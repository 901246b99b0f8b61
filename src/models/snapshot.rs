//! Pool-wide status snapshot consumed by the presentation layer.

use serde::{Deserialize, Serialize};

use super::slot::SlotSnapshot;
use crate::mode::{ExecutionMode, PoolMode};

/// Point-in-time view of a pool. Built by copying state out under the pool
/// mutex; never blocks on I/O.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct PoolStatusSnapshot {
    /// Pool topology.
    pub mode: PoolMode,
    /// Output capture mode.
    pub execution_mode: ExecutionMode,
    /// Fixed slots, or active executions in dynamic mode.
    pub slots: Vec<SlotSnapshot>,
    /// Tasks waiting in the overflow queue.
    pub queue_size: usize,
    /// Slots or executions currently `Running`.
    pub active_count: usize,
    /// Slot count (fixed) or `max_parallel` (dynamic).
    pub capacity: usize,
    /// Results retained in the ring buffer.
    pub completed_count: usize,
}

/// Outcome of an `assign_task` call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Assignment {
    /// Whether a slot took the task immediately.
    pub assigned: bool,
    /// Slot index when assigned; `None` when queued.
    pub slot_index: Option<usize>,
}

impl Assignment {
    /// Task started on `slot_index`.
    #[must_use]
    pub fn started(slot_index: usize) -> Self {
        Self {
            assigned: true,
            slot_index: Some(slot_index),
        }
    }

    /// Task placed in the overflow queue.
    #[must_use]
    pub fn queued() -> Self {
        Self {
            assigned: false,
            slot_index: None,
        }
    }
}
