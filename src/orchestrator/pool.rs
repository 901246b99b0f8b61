//! Mode-independent pool facade.
//!
//! Callers hold an `Arc<Pool>` and never branch on the topology; the
//! dynamic-only operations report `InvalidState` on a fixed pool.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::info;

use super::fixed_pool::{SlotPool, SlotPoolOptions};
use super::slot::{SlotSettings, WorkspaceLayout};
use super::swarm::{Swarm, SwarmOptions};
use super::PoolServices;
use crate::config::GlobalConfig;
use crate::mode::PoolMode;
use crate::models::result::CompletedResult;
use crate::models::snapshot::{Assignment, PoolStatusSnapshot};
use crate::models::task::{Task, TaskId};
use crate::store::TaskStore;
use crate::{AppError, Result};

/// Where to look for an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactTarget {
    /// Current workspace of a slot (or live execution ordinal).
    Slot(usize),
    /// Most recent workspace of a task.
    Task(TaskId),
}

/// The pool, in either topology.
#[derive(Clone)]
pub enum Pool {
    /// Fixed slots with an overflow queue.
    Fixed(Arc<SlotPool>),
    /// On-demand executions fed by a task store.
    Dynamic(Arc<Swarm>),
}

impl Pool {
    /// Build the pool selected by `config.mode`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if dynamic mode is selected without a
    /// store, or if the child launcher cannot be resolved.
    pub fn from_config(
        config: &GlobalConfig,
        store: Option<Arc<dyn TaskStore>>,
        services: PoolServices,
    ) -> Result<Self> {
        match config.mode {
            PoolMode::Fixed => {
                let settings = SlotSettings::from_config(config, WorkspaceLayout::PerSlot)?;
                let options = SlotPoolOptions::from_config(config);
                info!(slots = options.slot_count, queue_capacity = options.queue_capacity, "fixed pool ready");
                Ok(Self::Fixed(Arc::new(SlotPool::new(settings, options, services))))
            }
            PoolMode::Dynamic => {
                let store = store.ok_or_else(|| {
                    AppError::Config("dynamic mode requires a task store".into())
                })?;
                let settings = SlotSettings::from_config(config, WorkspaceLayout::PerTask)?;
                let options = SwarmOptions::from_config(config);
                info!(max_parallel = options.max_parallel, min_priority = options.min_priority, "swarm ready");
                Ok(Self::Dynamic(Arc::new(Swarm::new(
                    settings, store, options, services,
                ))))
            }
        }
    }

    /// Topology of this pool.
    #[must_use]
    pub fn mode(&self) -> PoolMode {
        match self {
            Self::Fixed(_) => PoolMode::Fixed,
            Self::Dynamic(_) => PoolMode::Dynamic,
        }
    }

    /// Start the background loops.
    #[must_use]
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        match self {
            Self::Fixed(pool) => vec![pool.spawn_harvester()],
            Self::Dynamic(swarm) => swarm.spawn_loops(),
        }
    }

    /// Submit a task.
    ///
    /// # Errors
    ///
    /// Propagates the topology's assignment errors: `AlreadyActive`,
    /// `QueueFull`, or `SlotUnavailable`.
    pub async fn assign_task(&self, task: Task) -> Result<Assignment> {
        match self {
            Self::Fixed(pool) => pool.assign_task(task).await,
            Self::Dynamic(swarm) => swarm.assign_task(task).await,
        }
    }

    /// Current status.
    pub async fn status(&self) -> PoolStatusSnapshot {
        match self {
            Self::Fixed(pool) => pool.status().await,
            Self::Dynamic(swarm) => swarm.status().await,
        }
    }

    /// Output of a slot since `position`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown slot.
    pub async fn output_since(&self, slot_index: usize, position: usize) -> Result<(Bytes, usize)> {
        match self {
            Self::Fixed(pool) => pool.output_since(slot_index, position),
            Self::Dynamic(swarm) => swarm.output_since(slot_index, position).await,
        }
    }

    /// Forward operator input to a slot.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown slot and
    /// `AppError::InvalidState` when the slot takes no input.
    pub async fn send_input(&self, slot_index: usize, text: &str) -> Result<()> {
        match self {
            Self::Fixed(pool) => pool.send_input(slot_index, text).await,
            Self::Dynamic(swarm) => swarm.send_input(slot_index, text).await,
        }
    }

    /// Kill a slot and return it to idle.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown slot.
    pub async fn reset_slot(&self, slot_index: usize) -> Result<()> {
        match self {
            Self::Fixed(pool) => pool.reset_slot(slot_index).await,
            Self::Dynamic(swarm) => swarm.reset_slot(slot_index).await,
        }
    }

    /// Kill everything; returns the number of queued tasks dropped.
    pub async fn kill_all(&self) -> usize {
        match self {
            Self::Fixed(pool) => pool.kill_all().await,
            Self::Dynamic(swarm) => swarm.kill_all().await,
        }
    }

    /// Approve a finished task's workspace.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` on a fixed pool, plus the swarm's
    /// approval errors.
    pub async fn approve(&self, task_id: &TaskId) -> Result<PathBuf> {
        match self {
            Self::Fixed(_) => Err(AppError::InvalidState(
                "approve is only available in dynamic mode".into(),
            )),
            Self::Dynamic(swarm) => swarm.approve(task_id).await,
        }
    }

    /// Reject a task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` on a fixed pool, plus the swarm's
    /// rejection errors.
    pub async fn reject(&self, task_id: &TaskId) -> Result<()> {
        match self {
            Self::Fixed(_) => Err(AppError::InvalidState(
                "reject is only available in dynamic mode".into(),
            )),
            Self::Dynamic(swarm) => swarm.reject(task_id).await,
        }
    }

    /// Read an artifact.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown target or file and
    /// `AppError::AccessDenied` when the path leaves the workspace.
    pub async fn read_artifact(&self, target: &ArtifactTarget, relative: &str) -> Result<String> {
        match (self, target) {
            (Self::Fixed(pool), ArtifactTarget::Slot(i)) => pool.read_slot_artifact(*i, relative).await,
            (Self::Fixed(pool), ArtifactTarget::Task(id)) => pool.read_task_artifact(id, relative).await,
            (Self::Dynamic(swarm), ArtifactTarget::Slot(i)) => {
                swarm.read_slot_artifact(*i, relative).await
            }
            (Self::Dynamic(swarm), ArtifactTarget::Task(id)) => {
                swarm.read_task_artifact(id, relative).await
            }
        }
    }

    /// List artifacts.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown target.
    pub async fn list_artifacts(&self, target: &ArtifactTarget) -> Result<Vec<String>> {
        match (self, target) {
            (Self::Fixed(pool), ArtifactTarget::Slot(i)) => pool.list_slot_artifacts(*i).await,
            (Self::Fixed(pool), ArtifactTarget::Task(id)) => pool.list_task_artifacts(id).await,
            (Self::Dynamic(swarm), ArtifactTarget::Slot(i)) => swarm.list_slot_artifacts(*i).await,
            (Self::Dynamic(swarm), ArtifactTarget::Task(id)) => swarm.list_task_artifacts(id).await,
        }
    }

    /// Recently completed results, oldest first.
    pub async fn completed_results(&self) -> Vec<CompletedResult> {
        match self {
            Self::Fixed(pool) => pool.completed_results().await,
            Self::Dynamic(swarm) => swarm.completed_results().await,
        }
    }

    /// Delete a finished task's workspace directories.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` while the task runs and
    /// `AppError::NotFound` if nothing exists to delete.
    pub async fn cleanup_workspace(&self, task_id: &TaskId) -> Result<usize> {
        match self {
            Self::Fixed(pool) => pool.cleanup_workspace(task_id).await,
            Self::Dynamic(swarm) => swarm.cleanup_workspace(task_id).await,
        }
    }

    /// Stop background loops and kill every child.
    pub async fn shutdown(&self) {
        match self {
            Self::Fixed(pool) => pool.shutdown().await,
            Self::Dynamic(swarm) => swarm.shutdown().await,
        }
        info!("pool shut down");
    }
}
