//! Execution slot: one child process lifecycle at a time.
//!
//! State lives behind a short-held `std::sync::Mutex` so snapshots never
//! await. Every assignment bumps a generation counter; the supervisor task
//! of an assignment only writes back while the slot still carries its
//! generation, so a late supervisor can never clobber a newer task.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::output::{self, SharedOutput};
use super::process::{self, LaunchSpec};
use super::watchdog::{ExitCause, Watchdog};
use crate::config::{GlobalConfig, SolverConfig};
use crate::handoff::{self, StatusState};
use crate::mode::{ExecutionMode, ReleasePolicy};
use crate::models::result::{CompletedResult, CompletionStatus};
use crate::models::slot::{SlotSnapshot, SlotStatus, RESULT_PREVIEW_CHARS};
use crate::models::task::{Task, TaskId};
use crate::script::TaskScript;
use crate::{AppError, Result};

/// How long output readers may keep draining after the child exits.
const READER_DRAIN: Duration = Duration::from_millis(500);

/// How workspace directories are named under the workspace root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceLayout {
    /// `slot-{index}-{task_id}`, used by the fixed pool.
    PerSlot,
    /// `task-{task_id}`, used by the dynamic swarm.
    PerTask,
}

/// Settings shared by every slot of one pool.
#[derive(Debug, Clone)]
pub struct SlotSettings {
    /// Root holding every workspace.
    pub workspace_root: PathBuf,
    /// Workspace naming scheme.
    pub layout: WorkspaceLayout,
    /// Output capture mode.
    pub execution_mode: ExecutionMode,
    /// Watchdog wall-clock budget.
    pub budget: Duration,
    /// Grace period between graceful and forced termination.
    pub grace: Duration,
    /// Output buffer bound in bytes.
    pub output_capacity: usize,
    /// Solver rendered into every program.
    pub solver: SolverConfig,
    /// CPU cap for batch children; 0 disables it.
    pub cpu_limit_seconds: u64,
    /// Child launcher.
    pub launch: LaunchSpec,
}

impl SlotSettings {
    /// Derive slot settings from the global configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the child launcher cannot be resolved.
    pub fn from_config(config: &GlobalConfig, layout: WorkspaceLayout) -> Result<Self> {
        let (program, args) = config.child_launcher()?;
        let execution_mode = config.execution_mode();
        Ok(Self {
            workspace_root: config.workspace_root.clone(),
            layout,
            execution_mode,
            budget: config.budget_for(execution_mode),
            grace: config.kill_grace(),
            output_capacity: config.output_buffer_bytes,
            solver: config.solver.clone(),
            cpu_limit_seconds: config.sandbox.cpu_limit_seconds,
            launch: LaunchSpec {
                program,
                args,
                passthrough_env: config.passthrough_env.clone(),
            },
        })
    }

    /// Workspace directory for `task_id` on slot `index`.
    #[must_use]
    pub fn workspace_for(&self, index: usize, task_id: &TaskId) -> PathBuf {
        let name = match self.layout {
            WorkspaceLayout::PerSlot => format!("slot-{index}-{task_id}"),
            WorkspaceLayout::PerTask => format!("task-{task_id}"),
        };
        self.workspace_root.join(name)
    }
}

/// Handles of a live child, present from spawn until reset.
#[derive(Debug, Clone)]
struct ProcessControl {
    kill: CancellationToken,
    exited: watch::Receiver<bool>,
    stdin: Option<Arc<tokio::sync::Mutex<ChildStdin>>>,
    pid: Option<u32>,
}

#[derive(Debug)]
struct SlotState {
    status: SlotStatus,
    task: Option<Task>,
    workspace: Option<PathBuf>,
    generation: u64,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    result: String,
    outcome: Option<CompletionStatus>,
    artifacts: Vec<String>,
    harvested: bool,
    output: SharedOutput,
    kill: CancellationToken,
    control: Option<ProcessControl>,
}

impl SlotState {
    fn new(output_capacity: usize) -> Self {
        Self {
            status: SlotStatus::Idle,
            task: None,
            workspace: None,
            generation: 0,
            started_at: None,
            finished_at: None,
            result: String::new(),
            outcome: None,
            artifacts: Vec::new(),
            harvested: false,
            output: output::shared(output_capacity),
            kill: CancellationToken::new(),
            control: None,
        }
    }

    fn child_alive(&self) -> bool {
        self.control
            .as_ref()
            .is_some_and(|control| !*control.exited.borrow())
    }

    fn accepts(&self, policy: ReleasePolicy) -> bool {
        match self.status {
            SlotStatus::Idle => true,
            SlotStatus::Done | SlotStatus::Failed => {
                policy == ReleasePolicy::Reuse && self.harvested && !self.child_alive()
            }
            SlotStatus::Running => false,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.status == SlotStatus::Running
    }

    fn finish(&mut self, status: SlotStatus, outcome: CompletionStatus, result: String) {
        self.status = status;
        self.outcome = Some(outcome);
        self.result = result;
        self.finished_at = Some(Utc::now());
    }
}

/// Proof that a slot was reserved for one assignment; consumed by
/// [`ExecutionSlot::launch`].
#[derive(Debug)]
#[must_use = "a reserved slot stays Running until launched"]
pub struct Reservation {
    generation: u64,
}

/// A reusable execution context bound to at most one task at a time.
#[derive(Debug)]
pub struct ExecutionSlot {
    index: usize,
    settings: Arc<SlotSettings>,
    state: Mutex<SlotState>,
}

impl ExecutionSlot {
    /// Create an idle slot.
    #[must_use]
    pub fn new(index: usize, settings: Arc<SlotSettings>) -> Self {
        let state = SlotState::new(settings.output_capacity);
        Self {
            index,
            settings,
            state: Mutex::new(state),
        }
    }

    /// Position of the slot within its pool.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> SlotStatus {
        self.lock().status
    }

    /// Identifier of the bound task, if any.
    #[must_use]
    pub fn task_id(&self) -> Option<TaskId> {
        self.lock().task.as_ref().map(|task| task.id.clone())
    }

    /// Workspace of the current or last assignment.
    #[must_use]
    pub fn workspace(&self) -> Option<PathBuf> {
        self.lock().workspace.clone()
    }

    /// Whether a new task may be bound under `policy`.
    ///
    /// Idle slots always qualify; under [`ReleasePolicy::Reuse`] a finished
    /// slot qualifies once its result has been harvested and its
    /// supervisor has signed off.
    #[must_use]
    pub fn is_available(&self, policy: ReleasePolicy) -> bool {
        self.lock().accepts(policy)
    }

    /// Bind `task` and start its child.
    ///
    /// Returns `Ok(false)` if the slot is not idle. A spawn failure still
    /// returns `Ok(true)`: the slot is occupied and reports `Failed` with
    /// the diagnostic in its result.
    ///
    /// # Errors
    ///
    /// Currently infallible beyond the boolean outcome; the `Result` leaves
    /// room for callers that treat reservation errors uniformly.
    pub async fn assign(self: &Arc<Self>, task: Task) -> Result<bool> {
        let Some(reservation) = self.try_reserve(task, ReleasePolicy::Retain) else {
            return Ok(false);
        };
        self.launch(reservation).await;
        Ok(true)
    }

    /// Bind `task` without any I/O. Safe to call under a pool lock.
    ///
    /// Returns `None` unless the slot is available under `policy`; a
    /// recycled slot drops its previous result and output here.
    pub fn try_reserve(&self, task: Task, policy: ReleasePolicy) -> Option<Reservation> {
        let mut state = self.lock();
        if !state.accepts(policy) {
            return None;
        }
        let workspace = self.settings.workspace_for(self.index, &task.id);
        state.generation += 1;
        state.status = SlotStatus::Running;
        state.workspace = Some(workspace);
        state.task = Some(task);
        state.started_at = Some(Utc::now());
        state.finished_at = None;
        state.result.clear();
        state.outcome = None;
        state.artifacts.clear();
        state.harvested = false;
        state.output = output::shared(self.settings.output_capacity);
        state.kill = CancellationToken::new();
        state.control = None;
        Some(Reservation {
            generation: state.generation,
        })
    }

    /// Prepare the workspace, render the program, and spawn the child for a
    /// reservation. Failures leave the slot `Failed` with a diagnostic.
    pub async fn launch(self: &Arc<Self>, reservation: Reservation) {
        let generation = reservation.generation;
        let (task, workspace, buffer) = {
            let state = self.lock();
            if !state.is_current(generation) {
                return;
            }
            let (Some(task), Some(workspace)) = (state.task.clone(), state.workspace.clone())
            else {
                return;
            };
            (task, workspace, Arc::clone(&state.output))
        };

        let span = info_span!("slot_launch", slot = self.index, task_id = %task.id, generation);
        if let Err(err) = self
            .start_child(generation, task, &workspace, buffer)
            .instrument(span)
            .await
        {
            warn!(slot = self.index, %err, "slot launch failed");
            let mut state = self.lock();
            if state.is_current(generation) {
                state.finish(SlotStatus::Failed, CompletionStatus::Failed, err.to_string());
            }
        }
    }

    async fn start_child(
        self: &Arc<Self>,
        generation: u64,
        task: Task,
        workspace: &Path,
        buffer: SharedOutput,
    ) -> Result<()> {
        let settings = &self.settings;
        tokio::fs::create_dir_all(workspace).await.map_err(|err| {
            AppError::Spawn(format!(
                "failed to create workspace {}: {err}",
                workspace.display()
            ))
        })?;
        handoff::clear_status(workspace).await?;

        let task_id = task.id.to_string();
        let program = TaskScript::new(task)
            .solver(settings.solver.clone())
            .execution_mode(settings.execution_mode)
            .cpu_limit_seconds(settings.cpu_limit_seconds)
            .render(workspace);
        let program_path = program.write().await?;

        let kill = {
            let state = self.lock();
            if !state.is_current(generation) {
                debug!(slot = self.index, "assignment killed before spawn");
                return Ok(());
            }
            state.kill.clone()
        };

        let mut child = process::spawn_child(
            &settings.launch,
            &program_path,
            workspace,
            &task_id,
            settings.execution_mode,
        )?;
        let pid = child.id();

        let io_cancel = CancellationToken::new();
        let mut readers: Vec<JoinHandle<()>> = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(output::pump(
                stdout,
                Arc::clone(&buffer),
                io_cancel.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(output::pump(
                stderr,
                Arc::clone(&buffer),
                io_cancel.clone(),
            )));
        }
        let stdin = child
            .stdin
            .take()
            .map(|stdin| Arc::new(tokio::sync::Mutex::new(stdin)));

        let (exited_tx, exited_rx) = watch::channel(false);

        let stale = {
            let mut state = self.lock();
            if state.is_current(generation) && !kill.is_cancelled() {
                state.control = Some(ProcessControl {
                    kill: kill.clone(),
                    exited: exited_rx,
                    stdin,
                    pid,
                });
                false
            } else {
                true
            }
        };
        if stale {
            // Killed or reset while spawning: the child belongs to nobody.
            io_cancel.cancel();
            process::terminate(&mut child, settings.grace).await;
            return Ok(());
        }

        let watchdog = Watchdog::new(
            self.index,
            task_id.clone(),
            settings.budget,
            settings.grace,
            kill,
        );
        let slot = Arc::clone(self);
        tokio::spawn(
            async move {
                let cause = watchdog.supervise(child).await;
                let drain = async {
                    for reader in readers {
                        let _ = reader.await;
                    }
                };
                if tokio::time::timeout(READER_DRAIN, drain).await.is_err() {
                    debug!(slot = slot.index, "output readers still open, cancelling");
                }
                io_cancel.cancel();
                slot.finish(generation, cause).await;
                let _ = exited_tx.send(true);
            }
            .instrument(info_span!("slot_supervisor", slot = self.index, task_id, generation)),
        );

        info!(slot = self.index, pid, "slot running");
        Ok(())
    }

    /// Record the outcome of an assignment once its child has stopped.
    async fn finish(&self, generation: u64, cause: ExitCause) {
        let workspace = {
            let state = self.lock();
            if !state.is_current(generation) {
                return;
            }
            state.workspace.clone()
        };

        let (status, outcome, result, artifacts) = match cause {
            ExitCause::TimedOut(budget) => (
                SlotStatus::Failed,
                CompletionStatus::TimedOut,
                format!("timed out after {budget:?}"),
                Vec::new(),
            ),
            ExitCause::Killed => (
                SlotStatus::Failed,
                CompletionStatus::Failed,
                "killed".to_owned(),
                Vec::new(),
            ),
            ExitCause::Exited(code) => match workspace {
                Some(ref dir) => harvest(dir, code).await,
                None => crashed(code),
            },
            ExitCause::WaitFailed(err) => (
                SlotStatus::Failed,
                CompletionStatus::Failed,
                format!("child crashed: lost track of process ({err})"),
                Vec::new(),
            ),
        };

        let mut state = self.lock();
        if !state.is_current(generation) {
            return;
        }
        state.finish(status, outcome, result);
        state.artifacts = artifacts;
        if let Some(control) = state.control.as_mut() {
            control.stdin = None;
        }
        info!(slot = self.index, ?status, ?outcome, "slot finished");
    }

    /// Whether a child exists and has not exited.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock().child_alive()
    }

    /// Output appended since `position`, and the new position.
    #[must_use]
    pub fn output_since(&self, position: usize) -> (Bytes, usize) {
        let buffer = Arc::clone(&self.lock().output);
        let guard = buffer.lock().unwrap_or_else(PoisonError::into_inner);
        guard.since(position)
    }

    /// Write `text` to the child's stdin, adding a trailing newline.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` in batch mode or when no child is
    /// accepting input, and `AppError::Io` if the write fails.
    pub async fn send_input(&self, text: &str) -> Result<()> {
        if self.settings.execution_mode != ExecutionMode::Streaming {
            return Err(AppError::InvalidState(
                "input is only accepted in streaming mode".into(),
            ));
        }
        let stdin = self
            .lock()
            .control
            .as_ref()
            .and_then(|control| control.stdin.clone())
            .ok_or_else(|| {
                AppError::InvalidState(format!("slot {} has no running child", self.index))
            })?;

        let mut line = text.to_owned();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        let mut stdin = stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Terminate the child, if any, and wait until the slot has recorded
    /// the outcome. Idempotent and safe to call concurrently.
    ///
    /// A reserved slot whose child is not spawned yet is marked `Failed`
    /// on the spot; its pending launch then never starts a child.
    pub async fn kill(&self) {
        let control = {
            let mut state = self.lock();
            state.kill.cancel();
            let Some(control) = state.control.as_mut() else {
                if state.status == SlotStatus::Running {
                    state.finish(
                        SlotStatus::Failed,
                        CompletionStatus::Failed,
                        "killed".to_owned(),
                    );
                    info!(slot = self.index, "slot killed before launch");
                }
                return;
            };
            control.stdin = None;
            control.clone()
        };
        control.kill.cancel();
        let mut exited = control.exited;
        if exited.wait_for(|done| *done).await.is_err() {
            debug!(slot = self.index, "supervisor gone before signalling exit");
        }
    }

    /// Kill the child and return the slot to `Idle`. The workspace
    /// directory is left on disk.
    ///
    /// Returns the assignment's result if it had not been harvested yet, so
    /// a reset never silently loses an outcome.
    pub async fn reset(&self) -> Option<CompletedResult> {
        self.kill().await;
        let mut state = self.lock();
        let unharvested = if state.status.is_terminal() && !state.harvested {
            build_result(self.index, &state)
        } else {
            None
        };
        let generation = state.generation;
        *state = SlotState::new(self.settings.output_capacity);
        state.generation = generation;
        debug!(slot = self.index, "slot reset");
        unharvested
    }

    /// Result of the last assignment, returned once per assignment after
    /// the slot has reached `Done` or `Failed`.
    pub fn take_unharvested(&self) -> Option<CompletedResult> {
        let mut state = self.lock();
        if !state.status.is_terminal() || state.harvested {
            return None;
        }
        let result = build_result(self.index, &state)?;
        state.harvested = true;
        Some(result)
    }

    /// Read-only projection for status consumers.
    #[must_use]
    pub fn snapshot(&self) -> SlotSnapshot {
        let state = self.lock();
        let elapsed_seconds = state.started_at.map_or(0.0, |start| {
            let end = state.finished_at.unwrap_or_else(Utc::now);
            (end - start).to_std().map_or(0.0, |d| d.as_secs_f64())
        });
        let output_position = state
            .output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .position();
        let running = state.child_alive();

        SlotSnapshot {
            slot_index: self.index,
            status: state.status,
            task_id: state.task.as_ref().map(|t| t.id.clone()),
            description: state.task.as_ref().map(|t| t.description.clone()),
            category: state.task.as_ref().map(|t| t.category),
            priority: state.task.as_ref().map(|t| t.priority),
            workspace: state.workspace.clone(),
            started_at: state.started_at,
            finished_at: state.finished_at,
            elapsed_seconds,
            running,
            pid: state.control.as_ref().and_then(|control| control.pid),
            output_position,
            result_preview: state.result.chars().take(RESULT_PREVIEW_CHARS).collect(),
        }
    }

    /// Read an artifact from the current workspace.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the slot has no workspace or the file
    /// is missing, and `AppError::AccessDenied` on traversal.
    pub async fn read_artifact(&self, relative: &str) -> Result<String> {
        let workspace = self.require_workspace()?;
        handoff::read_artifact(&workspace, relative).await
    }

    /// List artifacts in the current workspace.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the slot has no workspace.
    pub async fn list_artifacts(&self) -> Result<Vec<String>> {
        let workspace = self.require_workspace()?;
        handoff::list_artifacts(&workspace).await
    }

    fn require_workspace(&self) -> Result<PathBuf> {
        self.workspace()
            .ok_or_else(|| AppError::NotFound(format!("slot {} has no workspace", self.index)))
    }
}

fn build_result(index: usize, state: &SlotState) -> Option<CompletedResult> {
    let task = state.task.clone()?;
    Some(CompletedResult {
        slot_index: index,
        task,
        status: state.outcome.unwrap_or(CompletionStatus::Failed),
        result: state.result.clone(),
        artifacts: state.artifacts.clone(),
        workspace: state.workspace.clone().unwrap_or_default(),
        finished_at: state.finished_at.unwrap_or_else(Utc::now),
    })
}

type Harvest = (SlotStatus, CompletionStatus, String, Vec<String>);

/// Turn the workspace's status document into an outcome.
async fn harvest(workspace: &Path, code: Option<i32>) -> Harvest {
    let Some(doc) = handoff::read_status(workspace).await else {
        return crashed(code);
    };
    match doc.status {
        StatusState::Completed => {
            let artifacts = if doc.artifacts.is_empty() {
                handoff::list_artifacts(workspace).await.unwrap_or_default()
            } else {
                doc.artifacts
            };
            (
                SlotStatus::Done,
                CompletionStatus::Completed,
                doc.result,
                artifacts,
            )
        }
        StatusState::Failed => (
            SlotStatus::Failed,
            CompletionStatus::Failed,
            doc.result,
            doc.artifacts,
        ),
        StatusState::Running => crashed(code),
    }
}

fn crashed(code: Option<i32>) -> Harvest {
    let detail = code.map_or_else(
        || "terminated by signal".to_owned(),
        |c| format!("exit code {c}"),
    );
    (
        SlotStatus::Failed,
        CompletionStatus::Failed,
        format!("child crashed: exited ({detail}) without reporting a result"),
        Vec::new(),
    )
}
