//! Pool and execution modes.
//!
//! `PoolMode` selects between the fixed slot pool and the dynamic swarm.
//! `ExecutionMode` selects how a slot captures its child's output, and
//! `ReleasePolicy` decides when a finished slot may take a new task.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Top-level pool topology, passed as `--mode` or `mode = "..."` in config.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolMode {
    /// N pre-created slots with an overflow queue. Default mode.
    #[default]
    Fixed,
    /// Executions created on demand from the external task store.
    Dynamic,
}

/// How a slot runs and observes its child process.
#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// stdout/stderr captured into a bounded byte buffer; stdin accepts input.
    Streaming,
    /// No stream capture; the result comes only from the status document.
    Batch,
}

impl ExecutionMode {
    /// Default execution mode for a pool topology.
    #[must_use]
    pub fn default_for(pool: PoolMode) -> Self {
        match pool {
            PoolMode::Fixed => Self::Streaming,
            PoolMode::Dynamic => Self::Batch,
        }
    }
}

/// When a Done/Failed slot becomes eligible for a new task.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleasePolicy {
    /// Once harvested, the slot keeps its output readable until a queued
    /// task needs it; it is reset right before the new assignment.
    #[default]
    Reuse,
    /// The slot stays Done/Failed until an explicit reset.
    Retain,
}
