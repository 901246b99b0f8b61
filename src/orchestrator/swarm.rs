//! Dynamic swarm: executions created on demand from the task store.
//!
//! A poller turns pending store rows into executions while capacity
//! allows; a monitor harvests finished executions, writes their outcome
//! back to the store, and frees their capacity. Each execution gets a
//! fresh [`ExecutionSlot`] numbered by a monotonically increasing ordinal
//! and a `task-{id}` workspace.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
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
use crate::mode::{PoolMode, ReleasePolicy};
use crate::models::result::{CompletedResult, CompletedResults, CompletionStatus};
use crate::models::slot::SlotStatus;
use crate::models::snapshot::{Assignment, PoolStatusSnapshot};
use crate::models::task::{Task, TaskId, TaskStatus};
use crate::store::TaskStore;
use crate::{AppError, Result};

/// Sizing and timing for a [`Swarm`].
#[derive(Debug, Clone)]
pub struct SwarmOptions {
    /// Maximum concurrent executions.
    pub max_parallel: usize,
    /// Lowest store priority the poller picks up.
    pub min_priority: u8,
    /// Poller tick.
    pub poll_interval: Duration,
    /// Monitor tick.
    pub monitor_interval: Duration,
    /// Completed-results ring capacity.
    pub completed_capacity: usize,
    /// Destination root for approved workspaces.
    pub approved_root: PathBuf,
}

impl SwarmOptions {
    /// Options from the global configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            max_parallel: config.max_parallel,
            min_priority: config.store.min_priority,
            poll_interval: Duration::from_millis(config.intervals.poll_millis),
            monitor_interval: Duration::from_millis(config.intervals.monitor_millis),
            completed_capacity: config.completed_capacity,
            approved_root: config.approved_root(),
        }
    }
}

struct SwarmState {
    active: HashMap<TaskId, Arc<ExecutionSlot>>,
    completed: CompletedResults,
    next_ordinal: usize,
}

impl SwarmState {
    fn by_ordinal(&self, ordinal: usize) -> Option<(TaskId, Arc<ExecutionSlot>)> {
        self.active
            .iter()
            .find(|(_, slot)| slot.index() == ordinal)
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
    }
}

/// On-demand executor fed by a [`TaskStore`].
pub struct Swarm {
    settings: Arc<SlotSettings>,
    store: Arc<dyn TaskStore>,
    options: SwarmOptions,
    state: Mutex<SwarmState>,
    services: PoolServices,
    cancel: CancellationToken,
}

impl Swarm {
    /// Create an idle swarm. Call [`spawn_loops`](Self::spawn_loops) to start
    /// polling.
    #[must_use]
    pub fn new(
        settings: SlotSettings,
        store: Arc<dyn TaskStore>,
        options: SwarmOptions,
        services: PoolServices,
    ) -> Self {
        let state = SwarmState {
            active: HashMap::new(),
            completed: CompletedResults::with_capacity(options.completed_capacity),
            next_ordinal: 0,
        };
        Self {
            settings: Arc::new(settings),
            store,
            options,
            state: Mutex::new(state),
            services,
            cancel: CancellationToken::new(),
        }
    }

    fn reserve(&self, state: &mut SwarmState, task: Task) -> Option<(Arc<ExecutionSlot>, Reservation)> {
        let ordinal = state.next_ordinal;
        let slot = Arc::new(ExecutionSlot::new(ordinal, Arc::clone(&self.settings)));
        let id = task.id.clone();
        let reservation = slot.try_reserve(task, ReleasePolicy::Retain)?;
        state.next_ordinal += 1;
        state.active.insert(id, Arc::clone(&slot));
        Some((slot, reservation))
    }

    async fn mark_active(&self, task_id: &TaskId) {
        match self.store.update_status(task_id, TaskStatus::Active).await {
            Ok(()) => {}
            Err(AppError::NotFound(_)) => {
                debug!(task_id = %task_id, "task not in store; running unrecorded");
            }
            Err(err) => warn!(task_id = %task_id, %err, "failed to mark task active"),
        }
    }

    async fn start(&self, slot: Arc<ExecutionSlot>, reservation: Reservation, task_id: TaskId) {
        self.mark_active(&task_id).await;
        self.services.record(
            PoolEvent::new(PoolEventKind::TaskAssigned)
                .with_task(&task_id)
                .with_slot(slot.index()),
        );
        slot.launch(reservation).await;
    }

    /// Start `task` right away, bypassing the store poll.
    ///
    /// # Errors
    ///
    /// Returns `AppError::AlreadyActive` if the task already has a live
    /// execution and `AppError::SlotUnavailable` at `max_parallel`.
    pub async fn assign_task(&self, task: Task) -> Result<Assignment> {
        task.validate()?;
        let span = info_span!("swarm_assign", task_id = %task.id);
        async move {
            let task_id = task.id.clone();
            let (slot, reservation) = {
                let mut state = self.state.lock().await;
                if state.active.contains_key(&task_id) {
                    return Err(AppError::AlreadyActive(format!(
                        "task {task_id} already has a live execution"
                    )));
                }
                if state.active.len() >= self.options.max_parallel {
                    return Err(AppError::SlotUnavailable(format!(
                        "{} executions running",
                        state.active.len()
                    )));
                }
                self.reserve(&mut state, task).ok_or_else(|| {
                    AppError::SlotUnavailable("fresh execution refused the task".into())
                })?
            };
            let ordinal = slot.index();
            self.start(slot, reservation, task_id).await;
            Ok(Assignment::started(ordinal))
        }
        .instrument(span)
        .await
    }

    /// One poller pass: start pending store tasks while capacity allows.
    ///
    /// Returns the number of executions started. Store errors are logged
    /// and retried on the next tick.
    pub async fn poll(&self) -> usize {
        let pending = match self.store.pending_tasks(self.options.min_priority).await {
            Ok(pending) => pending,
            Err(err) => {
                warn!(%err, "task store poll failed");
                return 0;
            }
        };
        if pending.is_empty() {
            return 0;
        }

        let launches: Vec<_> = {
            let mut state = self.state.lock().await;
            let mut launches = Vec::new();
            for task in pending {
                if state.active.len() >= self.options.max_parallel {
                    break;
                }
                if state.active.contains_key(&task.id) {
                    continue;
                }
                let task_id = task.id.clone();
                if let Some((slot, reservation)) = self.reserve(&mut state, task) {
                    launches.push((slot, reservation, task_id));
                }
            }
            launches
        };

        let started = launches.len();
        if started > 0 {
            info!(started, "starting executions from store");
        }
        join_all(
            launches
                .into_iter()
                .map(|(slot, reservation, task_id)| self.start(slot, reservation, task_id)),
        )
        .await;
        started
    }

    /// One monitor pass: harvest finished executions, free their capacity,
    /// and write their outcome back to the store.
    pub async fn monitor(&self) -> usize {
        let results: Vec<CompletedResult> = {
            let mut state = self.state.lock().await;
            let mut finished: Vec<(TaskId, CompletedResult)> = state
                .active
                .iter()
                .filter_map(|(id, slot)| slot.take_unharvested().map(|r| (id.clone(), r)))
                .collect();
            finished.sort_by_key(|(_, result)| result.finished_at);
            for (id, result) in &finished {
                state.active.remove(id);
                state.completed.push(result.clone());
            }
            finished.into_iter().map(|(_, result)| result).collect()
        };

        for result in &results {
            self.write_back(result).await;
            self.services.announce(result);
        }
        results.len()
    }

    async fn write_back(&self, result: &CompletedResult) {
        let status = match result.status {
            CompletionStatus::Completed => TaskStatus::Completed,
            CompletionStatus::Failed | CompletionStatus::TimedOut => TaskStatus::Failed,
        };
        let id = &result.task.id;
        match self.store.update_status(id, status).await {
            Ok(()) => {}
            Err(AppError::NotFound(_)) => return,
            Err(err) => {
                warn!(task_id = %id, %err, "failed to write task outcome");
                return;
            }
        }
        if let Err(err) = self
            .store
            .record_workspace(id, &result.workspace, &result.artifacts)
            .await
        {
            warn!(task_id = %id, %err, "failed to record task workspace");
        }
    }

    /// Copy a finished task's workspace to `approved_root/task-{id}` and
    /// mark it approved.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` while the task is still executing,
    /// `AppError::NotFound` if its workspace is gone, and `AppError::Io` if
    /// the copy fails.
    pub async fn approve(&self, task_id: &TaskId) -> Result<PathBuf> {
        if self.state.lock().await.active.contains_key(task_id) {
            return Err(AppError::InvalidState(format!(
                "task {task_id} is still executing"
            )));
        }
        let source = self.settings.workspace_for(0, task_id);
        if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
            return Err(AppError::NotFound(format!(
                "workspace {} does not exist",
                source.display()
            )));
        }
        let destination = self.options.approved_root.join(format!("task-{task_id}"));
        if tokio::fs::try_exists(&destination).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&destination).await?;
        }
        let copied = copy_tree(&source, &destination).await?;

        match self.store.update_status(task_id, TaskStatus::Approved).await {
            Ok(()) => {}
            Err(err) => warn!(task_id = %task_id, %err, "failed to mark task approved"),
        }
        self.services.record(
            PoolEvent::new(PoolEventKind::TaskApproved)
                .with_task(task_id)
                .with_detail(destination.display().to_string()),
        );
        info!(task_id = %task_id, files = copied, destination = %destination.display(), "task approved");
        Ok(destination)
    }

    /// Mark a task rejected, killing and dropping any live execution.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if the status update fails, and
    /// `AppError::NotFound` if the task is neither executing nor stored.
    pub async fn reject(&self, task_id: &TaskId) -> Result<()> {
        let slot = self.state.lock().await.active.remove(task_id);
        let was_active = slot.is_some();
        if let Some(slot) = slot {
            slot.kill().await;
            let _discarded = slot.take_unharvested();
            debug!(task_id = %task_id, "rejected execution dropped");
        }
        match self.store.update_status(task_id, TaskStatus::Rejected).await {
            Ok(()) => {}
            Err(AppError::NotFound(_)) if was_active => {}
            Err(err) => return Err(err),
        }
        self.services
            .record(PoolEvent::new(PoolEventKind::TaskRejected).with_task(task_id));
        info!(task_id = %task_id, was_active, "task rejected");
        Ok(())
    }

    /// Point-in-time status of every live execution, ordered by ordinal.
    pub async fn status(&self) -> PoolStatusSnapshot {
        let (mut slots, completed_count) = {
            let state = self.state.lock().await;
            let slots: Vec<_> = state.active.values().map(|slot| slot.snapshot()).collect();
            (slots, state.completed.len())
        };
        slots.sort_by_key(|s| s.slot_index);
        let active_count = slots
            .iter()
            .filter(|s| s.status == SlotStatus::Running)
            .count();
        PoolStatusSnapshot {
            mode: PoolMode::Dynamic,
            execution_mode: self.settings.execution_mode,
            slots,
            queue_size: 0,
            active_count,
            capacity: self.options.max_parallel,
            completed_count,
        }
    }

    async fn execution(&self, ordinal: usize) -> Result<(TaskId, Arc<ExecutionSlot>)> {
        self.state
            .lock()
            .await
            .by_ordinal(ordinal)
            .ok_or_else(|| AppError::NotFound(format!("execution {ordinal}")))
    }

    /// Output of execution `ordinal` since `position`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no live execution has that ordinal.
    pub async fn output_since(&self, ordinal: usize, position: usize) -> Result<(Bytes, usize)> {
        let (_, slot) = self.execution(ordinal).await?;
        Ok(slot.output_since(position))
    }

    /// Forward operator input to execution `ordinal`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown execution and
    /// `AppError::InvalidState` when it takes no input.
    pub async fn send_input(&self, ordinal: usize, text: &str) -> Result<()> {
        let (_, slot) = self.execution(ordinal).await?;
        slot.send_input(text).await
    }

    /// Kill execution `ordinal` and drop it, recording its outcome.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no live execution has that ordinal.
    pub async fn reset_slot(&self, ordinal: usize) -> Result<()> {
        let (task_id, slot) = self.execution(ordinal).await?;
        let result = slot.reset().await;
        {
            let mut state = self.state.lock().await;
            state.active.remove(&task_id);
            if let Some(ref result) = result {
                state.completed.push(result.clone());
            }
        }
        if let Some(result) = result {
            self.write_back(&result).await;
            self.services.announce(&result);
        }
        self.services.record(
            PoolEvent::new(PoolEventKind::SlotReset)
                .with_task(&task_id)
                .with_slot(ordinal),
        );
        info!(execution = ordinal, task_id = %task_id, "execution reset");
        Ok(())
    }

    /// Kill every live execution. Outcomes are harvested by the monitor.
    pub async fn kill_all(&self) -> usize {
        let slots: Vec<_> = self.state.lock().await.active.values().cloned().collect();
        join_all(slots.iter().map(|slot| slot.kill())).await;
        warn!(killed = slots.len(), "all executions killed");
        0
    }

    /// Copy of the completed-results ring, oldest first.
    pub async fn completed_results(&self) -> Vec<CompletedResult> {
        self.state.lock().await.completed.to_vec()
    }

    /// Read an artifact from a live execution's workspace.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown execution or file and
    /// `AppError::AccessDenied` on traversal.
    pub async fn read_slot_artifact(&self, ordinal: usize, relative: &str) -> Result<String> {
        let (_, slot) = self.execution(ordinal).await?;
        slot.read_artifact(relative).await
    }

    /// Read an artifact from `task-{id}`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for a missing workspace or file and
    /// `AppError::AccessDenied` on traversal.
    pub async fn read_task_artifact(&self, task_id: &TaskId, relative: &str) -> Result<String> {
        handoff::read_artifact(&self.settings.workspace_for(0, task_id), relative).await
    }

    /// List artifacts of a live execution.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown execution.
    pub async fn list_slot_artifacts(&self, ordinal: usize) -> Result<Vec<String>> {
        let (_, slot) = self.execution(ordinal).await?;
        slot.list_artifacts().await
    }

    /// List artifacts in `task-{id}`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the workspace does not exist.
    pub async fn list_task_artifacts(&self, task_id: &TaskId) -> Result<Vec<String>> {
        handoff::list_artifacts(&self.settings.workspace_for(0, task_id)).await
    }

    /// Delete the `task-{id}` workspace.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` while the task executes and
    /// `AppError::NotFound` if no workspace exists.
    pub async fn cleanup_workspace(&self, task_id: &TaskId) -> Result<usize> {
        if self.state.lock().await.active.contains_key(task_id) {
            return Err(AppError::InvalidState(format!(
                "task {task_id} is still executing"
            )));
        }
        let dir = self.settings.workspace_for(0, task_id);
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(AppError::NotFound(format!("no workspace for task {task_id}")));
        }
        tokio::fs::remove_dir_all(&dir).await?;
        info!(task_id = %task_id, "workspace removed");
        Ok(1)
    }

    /// Start the poller and monitor loops; both stop on
    /// [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn spawn_loops(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let poller = {
            let swarm = Arc::clone(self);
            let interval = self.options.poll_interval;
            tokio::spawn(
                async move {
                    info!(interval_ms = interval.as_millis(), "poller started");
                    loop {
                        tokio::select! {
                            () = swarm.cancel.cancelled() => break,
                            () = tokio::time::sleep(interval) => {
                                swarm.poll().await;
                            }
                        }
                    }
                    info!("poller shutting down");
                }
                .instrument(info_span!("swarm_poller")),
            )
        };
        let monitor = {
            let swarm = Arc::clone(self);
            let interval = self.options.monitor_interval;
            tokio::spawn(
                async move {
                    info!(interval_ms = interval.as_millis(), "monitor started");
                    loop {
                        tokio::select! {
                            () = swarm.cancel.cancelled() => break,
                            () = tokio::time::sleep(interval) => {
                                swarm.monitor().await;
                            }
                        }
                    }
                    info!("monitor shutting down");
                }
                .instrument(info_span!("swarm_monitor")),
            )
        };
        vec![poller, monitor]
    }

    /// Stop both loops and kill every execution.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.kill_all().await;
    }
}

/// Recursively copy `source` into `destination`, skipping symlinks.
/// Returns the number of files copied.
async fn copy_tree(source: &Path, destination: &Path) -> Result<usize> {
    let mut copied = 0;
    let mut pending = vec![(source.to_path_buf(), destination.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        tokio::fs::create_dir_all(&to).await?;
        let mut entries = tokio::fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let kind = entry.file_type().await?;
            let target = to.join(entry.file_name());
            if kind.is_dir() {
                pending.push((entry.path(), target));
            } else if kind.is_file() {
                tokio::fs::copy(entry.path(), &target).await?;
                copied += 1;
            }
        }
    }
    Ok(copied)
}
