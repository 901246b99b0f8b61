//! Fixed pool: N pre-created slots, a FIFO overflow queue, and a
//! harvester loop.
//!
//! Every check-then-assign runs under the pool mutex, which only guards
//! the queue and the results ring. Slot reservation is synchronous and
//! cheap; workspace preparation and process spawn happen after the mutex
//! is released.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::slot::{ExecutionSlot, Reservation, SlotSettings};
use super::PoolServices;
use crate::audit::{PoolEvent, PoolEventKind};
use crate::config::GlobalConfig;
use crate::handoff;
use crate::mode::{ExecutionMode, PoolMode, ReleasePolicy};
use crate::models::result::{CompletedResult, CompletedResults};
use crate::models::slot::SlotStatus;
use crate::models::snapshot::{Assignment, PoolStatusSnapshot};
use crate::models::task::{Task, TaskId};
use crate::{AppError, Result};

/// Sizing and timing for a [`SlotPool`].
#[derive(Debug, Clone)]
pub struct SlotPoolOptions {
    /// Number of slots.
    pub slot_count: usize,
    /// Overflow queue bound; 0 means unbounded.
    pub queue_capacity: usize,
    /// Completed-results ring capacity.
    pub completed_capacity: usize,
    /// When finished slots may be reused.
    pub release_policy: ReleasePolicy,
    /// Harvester tick.
    pub harvest_interval: Duration,
}

impl SlotPoolOptions {
    /// Options from the global configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            slot_count: config.slot_count,
            queue_capacity: config.queue_capacity,
            completed_capacity: config.completed_capacity,
            release_policy: config.release_policy,
            harvest_interval: Duration::from_millis(config.intervals.harvest_millis),
        }
    }
}

struct PoolState {
    queue: VecDeque<Task>,
    completed: CompletedResults,
}

/// Fixed-size pool of execution slots.
pub struct SlotPool {
    slots: Vec<Arc<ExecutionSlot>>,
    settings: Arc<SlotSettings>,
    options: SlotPoolOptions,
    state: Mutex<PoolState>,
    services: PoolServices,
    cancel: CancellationToken,
}

impl SlotPool {
    /// Create a pool of idle slots. Call [`spawn_harvester`](Self::spawn_harvester)
    /// to start the background loop.
    #[must_use]
    pub fn new(settings: SlotSettings, options: SlotPoolOptions, services: PoolServices) -> Self {
        let settings = Arc::new(settings);
        let slots = (0..options.slot_count)
            .map(|index| Arc::new(ExecutionSlot::new(index, Arc::clone(&settings))))
            .collect();
        let state = PoolState {
            queue: VecDeque::new(),
            completed: CompletedResults::with_capacity(options.completed_capacity),
        };
        Self {
            slots,
            settings,
            options,
            state: Mutex::new(state),
            services,
            cancel: CancellationToken::new(),
        }
    }

    /// Look up a slot by index.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an index outside the pool.
    pub fn slot(&self, index: usize) -> Result<&Arc<ExecutionSlot>> {
        self.slots
            .get(index)
            .ok_or_else(|| AppError::NotFound(format!("slot {index}")))
    }

    /// Number of slots.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn is_running(&self, task_id: &TaskId) -> bool {
        self.slots.iter().any(|slot| {
            slot.status() == SlotStatus::Running && slot.task_id().as_ref() == Some(task_id)
        })
    }

    fn reserve_any(&self, task: &Task) -> Option<(Arc<ExecutionSlot>, Reservation)> {
        self.slots.iter().find_map(|slot| {
            slot.try_reserve(task.clone(), self.options.release_policy)
                .map(|reservation| (Arc::clone(slot), reservation))
        })
    }

    /// Start `task` on the first available slot, or queue it.
    ///
    /// While older tasks are waiting, new tasks join the back of the queue
    /// even if a slot happens to be free, so queue order is never
    /// overtaken.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AlreadyActive` if the task is running or queued,
    /// and `AppError::QueueFull` if it would have to be queued but the
    /// queue is at capacity.
    pub async fn assign_task(&self, task: Task) -> Result<Assignment> {
        task.validate()?;
        let span = info_span!("assign_task", task_id = %task.id);
        self.assign_inner(task).instrument(span).await
    }

    async fn assign_inner(&self, task: Task) -> Result<Assignment> {
        let (slot, reservation) = {
            let mut state = self.state.lock().await;
            if self.is_running(&task.id) || state.queue.iter().any(|q| q.id == task.id) {
                return Err(AppError::AlreadyActive(format!(
                    "task {} is already running or queued",
                    task.id
                )));
            }

            let reserved = if state.queue.is_empty() {
                self.reserve_any(&task)
            } else {
                None
            };

            let Some(launch) = reserved else {
                let capacity = self.options.queue_capacity;
                if capacity > 0 && state.queue.len() >= capacity {
                    return Err(AppError::QueueFull(format!(
                        "{} tasks already waiting",
                        state.queue.len()
                    )));
                }
                self.services
                    .record(PoolEvent::new(PoolEventKind::TaskQueued).with_task(&task.id));
                info!(queue_depth = state.queue.len() + 1, "task queued");
                state.queue.push_back(task);
                return Ok(Assignment::queued());
            };
            launch
        };

        let index = slot.index();
        self.services.record(
            PoolEvent::new(PoolEventKind::TaskAssigned)
                .with_task(&task.id)
                .with_slot(index),
        );
        slot.launch(reservation).await;
        Ok(Assignment::started(index))
    }

    /// One harvester pass: record every unharvested result, then move queued
    /// tasks onto available slots in FIFO order.
    pub async fn harvest(&self) {
        let (results, launches) = {
            let mut state = self.state.lock().await;

            let mut results: Vec<CompletedResult> = self
                .slots
                .iter()
                .filter_map(|slot| slot.take_unharvested())
                .collect();
            results.sort_by_key(|result| result.finished_at);
            for result in &results {
                state.completed.push(result.clone());
            }

            let mut launches = Vec::new();
            while let Some(next) = state.queue.front() {
                let Some(launch) = self.reserve_any(next) else {
                    break;
                };
                if let Some(task) = state.queue.pop_front() {
                    debug!(task_id = %task.id, slot = launch.0.index(), "dequeued task");
                    self.services.record(
                        PoolEvent::new(PoolEventKind::TaskAssigned)
                            .with_task(&task.id)
                            .with_slot(launch.0.index()),
                    );
                }
                launches.push(launch);
            }
            (results, launches)
        };

        for result in &results {
            self.services.announce(result);
        }
        join_all(
            launches
                .into_iter()
                .map(|(slot, reservation)| async move { slot.launch(reservation).await }),
        )
        .await;
    }

    /// Start the harvester loop; it stops on [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn spawn_harvester(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        let interval = self.options.harvest_interval;
        tokio::spawn(
            async move {
                info!(interval_ms = interval.as_millis(), "harvester started");
                loop {
                    tokio::select! {
                        () = pool.cancel.cancelled() => {
                            info!("harvester shutting down");
                            break;
                        }
                        () = tokio::time::sleep(interval) => {
                            pool.harvest().await;
                        }
                    }
                }
            }
            .instrument(info_span!("harvester")),
        )
    }

    /// Point-in-time status of every slot and the queue.
    pub async fn status(&self) -> PoolStatusSnapshot {
        let (queue_size, completed_count) = {
            let state = self.state.lock().await;
            (state.queue.len(), state.completed.len())
        };
        let slots: Vec<_> = self.slots.iter().map(|slot| slot.snapshot()).collect();
        let active_count = slots
            .iter()
            .filter(|s| s.status == SlotStatus::Running)
            .count();
        PoolStatusSnapshot {
            mode: PoolMode::Fixed,
            execution_mode: self.settings.execution_mode,
            slots,
            queue_size,
            active_count,
            capacity: self.slots.len(),
            completed_count,
        }
    }

    /// Output of slot `index` since `position`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown slot.
    pub fn output_since(&self, index: usize, position: usize) -> Result<(Bytes, usize)> {
        Ok(self.slot(index)?.output_since(position))
    }

    /// Forward operator input to slot `index`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown slot and
    /// `AppError::InvalidState` when the slot takes no input.
    pub async fn send_input(&self, index: usize, text: &str) -> Result<()> {
        if self.settings.execution_mode != ExecutionMode::Streaming {
            return Err(AppError::InvalidState(
                "input is only accepted in streaming mode".into(),
            ));
        }
        self.slot(index)?.send_input(text).await
    }

    /// Kill slot `index` and return it to idle. An outcome not yet
    /// harvested is recorded first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown slot.
    pub async fn reset_slot(&self, index: usize) -> Result<()> {
        let slot = Arc::clone(self.slot(index)?);
        let task_id = slot.task_id();
        if let Some(result) = slot.reset().await {
            self.state.lock().await.completed.push(result.clone());
            self.services.announce(&result);
        }
        let mut event = PoolEvent::new(PoolEventKind::SlotReset).with_slot(index);
        if let Some(ref id) = task_id {
            event = event.with_task(id);
        }
        self.services.record(event);
        info!(slot = index, "slot reset");
        Ok(())
    }

    /// Drop every queued task and kill every running child.
    ///
    /// Killed slots end `Failed` and are harvested on the next tick.
    /// Returns the number of queued tasks dropped.
    pub async fn kill_all(&self) -> usize {
        let dropped = {
            let mut state = self.state.lock().await;
            let dropped = state.queue.len();
            state.queue.clear();
            dropped
        };
        join_all(self.slots.iter().map(|slot| slot.kill())).await;
        warn!(dropped_queued = dropped, "all slots killed");
        dropped
    }

    /// Copy of the completed-results ring, oldest first.
    pub async fn completed_results(&self) -> Vec<CompletedResult> {
        self.state.lock().await.completed.to_vec()
    }

    /// Tasks waiting in the queue, head first.
    pub async fn queued_tasks(&self) -> Vec<Task> {
        self.state.lock().await.queue.iter().cloned().collect()
    }

    async fn workspace_of_task(&self, task_id: &TaskId) -> Result<std::path::PathBuf> {
        if let Some(workspace) = self
            .slots
            .iter()
            .find(|slot| slot.task_id().as_ref() == Some(task_id))
            .and_then(|slot| slot.workspace())
        {
            return Ok(workspace);
        }
        self.state
            .lock()
            .await
            .completed
            .latest_for(task_id.as_str())
            .map(|result| result.workspace.clone())
            .ok_or_else(|| AppError::NotFound(format!("no workspace for task {task_id}")))
    }

    /// Read an artifact from a slot's current workspace.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown slot or file and
    /// `AppError::AccessDenied` on traversal.
    pub async fn read_slot_artifact(&self, index: usize, relative: &str) -> Result<String> {
        self.slot(index)?.read_artifact(relative).await
    }

    /// Read an artifact from a task's most recent workspace.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown task or file and
    /// `AppError::AccessDenied` on traversal.
    pub async fn read_task_artifact(&self, task_id: &TaskId, relative: &str) -> Result<String> {
        let workspace = self.workspace_of_task(task_id).await?;
        handoff::read_artifact(&workspace, relative).await
    }

    /// List artifacts in a slot's current workspace.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown slot.
    pub async fn list_slot_artifacts(&self, index: usize) -> Result<Vec<String>> {
        self.slot(index)?.list_artifacts().await
    }

    /// List artifacts in a task's most recent workspace.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown task.
    pub async fn list_task_artifacts(&self, task_id: &TaskId) -> Result<Vec<String>> {
        let workspace = self.workspace_of_task(task_id).await?;
        handoff::list_artifacts(&workspace).await
    }

    /// Delete every workspace this pool created for `task_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` while the task is running and
    /// `AppError::NotFound` if no workspace exists.
    pub async fn cleanup_workspace(&self, task_id: &TaskId) -> Result<usize> {
        if self.is_running(task_id) {
            return Err(AppError::InvalidState(format!(
                "task {task_id} is still running"
            )));
        }
        let mut removed = 0;
        for index in 0..self.slots.len() {
            let dir = self.settings.workspace_for(index, task_id);
            if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
                tokio::fs::remove_dir_all(&dir).await?;
                removed += 1;
            }
        }
        if removed == 0 {
            return Err(AppError::NotFound(format!("no workspace for task {task_id}")));
        }
        info!(task_id = %task_id, removed, "workspaces removed");
        Ok(removed)
    }

    /// Stop the harvester and kill every child.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.kill_all().await;
    }
}
