//! File-based result handoff between a child and its slot.
//!
//! The child owns every write inside its workspace. It appends progress to
//! `agent.log`, drops artifacts next to it, and finally publishes
//! `status.json` with an atomic rename so the parent never observes a
//! half-written document. The parent only reads, and reads are idempotent.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::{AppError, Result};

pub mod path_safety;

pub use path_safety::resolve_within;

/// Rendered task program consumed by the child.
pub const PROGRAM_FILE: &str = "program.json";
/// Status document published by the child.
pub const STATUS_FILE: &str = "status.json";
/// Progress log appended by the child.
pub const LOG_FILE: &str = "agent.log";
/// Primary artifact written by the default runner.
pub const SOLUTION_FILE: &str = "solution.md";

/// Prefix of the temporary file a status document is staged in.
const STATUS_STAGING_PREFIX: &str = "status.json.";

/// Child-reported state inside `status.json`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    /// The child started but has not finished.
    Running,
    /// The solver produced a result.
    Completed,
    /// The child gave up.
    Failed,
}

/// Contents of `status.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StatusDocument {
    /// Task the document belongs to.
    pub task_id: String,
    /// Reported state.
    pub status: StatusState,
    /// Solver output or failure diagnostic.
    #[serde(default)]
    pub result: String,
    /// Artifact paths relative to the workspace.
    #[serde(default)]
    pub artifacts: Vec<String>,
    /// Time of the last write.
    pub updated_at: DateTime<Utc>,
}

impl StatusDocument {
    /// Build a document stamped with the current time.
    #[must_use]
    pub fn new(task_id: impl Into<String>, status: StatusState, result: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status,
            result: result.into(),
            artifacts: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Attach the artifact list.
    #[must_use]
    pub fn with_artifacts(mut self, artifacts: Vec<String>) -> Self {
        self.artifacts = artifacts;
        self
    }
}

/// Whether a workspace entry belongs to the protocol rather than the task.
#[must_use]
pub fn is_internal_file(name: &str) -> bool {
    name == PROGRAM_FILE
        || name == STATUS_FILE
        || name == LOG_FILE
        || name.starts_with(STATUS_STAGING_PREFIX)
}

/// Publish `doc` as the workspace's status document.
///
/// The document is staged in a temporary file inside the workspace and
/// renamed over `status.json`.
///
/// # Errors
///
/// Returns `AppError::Io` if staging or the rename fails.
pub fn write_status(workspace: &Path, doc: &StatusDocument) -> Result<()> {
    let body = serde_json::to_vec_pretty(doc)?;

    let mut staged = tempfile::Builder::new()
        .prefix(STATUS_STAGING_PREFIX)
        .suffix(".tmp")
        .tempfile_in(workspace)
        .map_err(|err| AppError::Io(format!("failed to stage status document: {err}")))?;
    staged
        .write_all(&body)
        .map_err(|err| AppError::Io(format!("failed to write status document: {err}")))?;
    staged.as_file().sync_all()?;

    staged.persist(workspace.join(STATUS_FILE)).map_err(|err| {
        AppError::Io(format!(
            "failed to publish status document in {}: {err}",
            workspace.display()
        ))
    })?;
    Ok(())
}

/// Read the workspace's status document.
///
/// Returns `None` when the document is missing or cannot be parsed; the
/// caller synthesizes a failure in that case.
pub async fn read_status(workspace: &Path) -> Option<StatusDocument> {
    let path = workspace.join(STATUS_FILE);
    let raw = match tokio::fs::read(&path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            warn!(path = %path.display(), %err, "status document unreadable");
            return None;
        }
    };
    match serde_json::from_slice(&raw) {
        Ok(doc) => Some(doc),
        Err(err) => {
            warn!(path = %path.display(), %err, "status document malformed");
            None
        }
    }
}

/// Remove a status document left over from an earlier run.
///
/// # Errors
///
/// Returns `AppError::Io` if an existing document cannot be removed.
pub async fn clear_status(workspace: &Path) -> Result<()> {
    match tokio::fs::remove_file(workspace.join(STATUS_FILE)).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AppError::Io(format!(
            "failed to clear stale status in {}: {err}",
            workspace.display()
        ))),
    }
}

/// Append one timestamped line to `agent.log`.
///
/// # Errors
///
/// Returns `AppError::Io` if the log cannot be opened or written.
pub async fn append_log(workspace: &Path, line: &str) -> Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(workspace.join(LOG_FILE))
        .await?;
    let stamped = format!("[{}] {line}\n", Utc::now().format("%H:%M:%S"));
    file.write_all(stamped.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// List every artifact in the workspace, relative and `/`-separated,
/// sorted. Protocol files at the top level and symlinks are skipped.
///
/// # Errors
///
/// Returns `AppError::NotFound` if the workspace does not exist.
pub async fn list_artifacts(workspace: &Path) -> Result<Vec<String>> {
    let mut found = Vec::new();
    let mut pending = vec![(workspace.to_path_buf(), String::new())];

    while let Some((dir, prefix)) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if prefix.is_empty() && is_internal_file(&name) {
                continue;
            }
            let relative = if prefix.is_empty() {
                name
            } else {
                format!("{prefix}/{name}")
            };
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push((entry.path(), relative));
            } else if file_type.is_file() {
                found.push(relative);
            }
        }
    }

    found.sort();
    Ok(found)
}

/// Read an artifact as UTF-8 text (lossy).
///
/// # Errors
///
/// Returns `AppError::AccessDenied` for traversal or symlink escapes and
/// `AppError::NotFound` if the file does not exist or is a directory.
pub async fn read_artifact(workspace: &Path, relative: &str) -> Result<String> {
    let path = resolve_within(workspace, relative)?;
    if path.is_dir() {
        return Err(AppError::NotFound(format!("{relative} is a directory")));
    }
    let raw = tokio::fs::read(&path)
        .await
        .map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => AppError::NotFound(format!("artifact {relative}")),
            _ => AppError::Io(format!("failed to read {relative}: {err}")),
        })?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}
