//! Child process launch and two-phase termination.
//!
//! Children start from a cleared environment carrying only an allowlist of
//! variables, so the pool's own secrets never reach a solver process.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::mode::ExecutionMode;
use crate::{AppError, Result};

/// Environment variables inherited by every child.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "LANG",
    "RUST_LOG",
    "TMPDIR",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Everything needed to start one child.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Launcher executable.
    pub program: PathBuf,
    /// Leading launcher arguments; the program path is appended.
    pub args: Vec<String>,
    /// Extra variables allowed through on top of [`ALLOWED_ENV_VARS`].
    pub passthrough_env: Vec<String>,
}

/// Start the child for `program_path` inside `workspace`.
///
/// Streaming children get piped stdio; batch children get none and report
/// only through the workspace.
///
/// # Errors
///
/// Returns `AppError::Spawn` if the OS refuses to create the process.
pub fn spawn_child(
    launch: &LaunchSpec,
    program_path: &Path,
    workspace: &Path,
    task_id: &str,
    mode: ExecutionMode,
) -> Result<Child> {
    let mut cmd = Command::new(&launch.program);
    cmd.args(&launch.args).arg(program_path);

    cmd.env_clear();
    for key in ALLOWED_ENV_VARS
        .iter()
        .copied()
        .chain(launch.passthrough_env.iter().map(String::as_str))
    {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }
    cmd.env("SHADOW_TASK_ID", task_id);
    cmd.env("SHADOW_WORKSPACE", workspace);

    match mode {
        ExecutionMode::Streaming => {
            cmd.stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
        }
        ExecutionMode::Batch => {
            cmd.stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
        }
    }

    #[cfg(unix)]
    cmd.process_group(0);

    let child = cmd
        .current_dir(workspace)
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| {
            AppError::Spawn(format!(
                "failed to start {}: {err}",
                launch.program.display()
            ))
        })?;

    info!(task_id, pid = child.id(), "child process spawned");
    Ok(child)
}

/// Stop `child`: graceful signal, wait up to `grace`, then force-kill.
///
/// Signals go to the child's whole process group so helpers it started
/// (a shell's subprocesses, a solver CLI) go down with it. Returns the
/// exit status if one could be collected. Safe on a child that has already
/// exited.
pub async fn terminate(child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    if let Ok(Some(status)) = child.try_wait() {
        return Some(status);
    }

    if let Some(pid) = child.id() {
        send_graceful(pid);
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(pid, "child exited after graceful signal");
                return Some(status);
            }
            Ok(Err(err)) => warn!(pid, %err, "error waiting for child after graceful signal"),
            Err(_elapsed) => {
                warn!(pid, "child did not exit within grace period, forcing kill");
            }
        }
    }

    if let Some(pid) = child.id() {
        send_forced(pid);
    }
    if let Err(err) = child.kill().await {
        warn!(%err, "failed to force-kill child process");
    }
    child.try_wait().ok().flatten()
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(err) = killpg(Pid::from_raw(raw), signal) {
        debug!(pid, %err, ?signal, "signal not delivered");
    }
}

#[cfg(unix)]
fn send_graceful(pid: u32) {
    signal_group(pid, nix::sys::signal::Signal::SIGTERM);
}

#[cfg(unix)]
fn send_forced(pid: u32) {
    signal_group(pid, nix::sys::signal::Signal::SIGKILL);
}

#[cfg(not(unix))]
fn send_graceful(_pid: u32) {}

#[cfg(not(unix))]
fn send_forced(_pid: u32) {}
