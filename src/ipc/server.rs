//! Local IPC server for `shadow-pool-ctl` commands.
//!
//! Listens on a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! using the `interprocess` crate. Accepts line-delimited JSON commands
//! and routes them to the pool.
//!
//! ## Protocol
//!
//! Request (one JSON object per line):
//! ```json
//! {"command": "status", "auth_token": "..."}
//! {"command": "assign", "task": {"id": "t1", "description": "...", "category": "code", "priority": 7}}
//! {"command": "output", "slot": 0, "position": 0}
//! {"command": "artifact", "task_id": "t1", "path": "solution.md"}
//! ```
//!
//! Response (one JSON object per line):
//! ```json
//! {"ok": true, "data": { ... } }
//! {"ok": false, "error": "not found: slot 9"}
//! ```

use std::path::Path;
use std::sync::Arc;

use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::classifier::{Classifier, ClassifierAction};
use crate::models::task::{Task, TaskId};
use crate::orchestrator::{ArtifactTarget, Pool};
use crate::{AppError, Result};

/// Inbound IPC request from `shadow-pool-ctl`.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct IpcRequest {
    /// Command verb.
    pub command: String,
    /// Task payload (for `assign`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
    /// Task identifier (for `approve`, `reject`, `artifact`, `artifacts`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Slot index or execution ordinal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<usize>,
    /// Output read position (for `output`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    /// Operator input, or text to classify.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Relative artifact path (for `artifact`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Submit an `auto_add` classification as a task (for `classify`).
    #[serde(default)]
    pub submit: bool,
    /// Shared-secret authentication token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl IpcRequest {
    /// Request for `command` with no arguments.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }
}

/// Outbound IPC response to `shadow-pool-ctl`.
#[derive(Debug, Serialize, Deserialize)]
pub struct IpcResponse {
    /// Whether the command succeeded.
    pub ok: bool,
    /// Payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IpcResponse {
    fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    fn from_result<T: Serialize>(result: Result<T>) -> Self {
        match result.and_then(|value| serde_json::to_value(value).map_err(AppError::from)) {
            Ok(data) => Self::success(data),
            Err(err) => Self::error(err.to_string()),
        }
    }
}

/// Everything a command handler may touch.
pub struct IpcContext {
    /// The pool being administered.
    pub pool: Pool,
    /// Classifier for the `classify` command.
    pub classifier: Classifier,
    /// Token clients must present, if any.
    pub auth_token: Option<String>,
}

/// Write the auth token to `<workspace_root>/.ipc-token`, readable only by
/// the owner on Unix.
///
/// # Errors
///
/// Returns `AppError::Io` if the file cannot be written.
pub fn write_token_file(workspace_root: &Path, token: &str) -> Result<()> {
    let path = workspace_root.join(super::TOKEN_FILE);
    std::fs::write(&path, token)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

/// Spawn the IPC server task.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the listener cannot be created.
pub fn spawn_ipc_server(
    name: &str,
    context: Arc<IpcContext>,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let name = name.to_owned();
    let listener_name = name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{name}': {err}")))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to create ipc listener: {err}")))?;

    info!(ipc_name = %name, "IPC server listening");

    let span = info_span!("ipc_server", name = %name);
    let handle = tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("IPC server shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                tokio::spawn(handle_connection(stream, Arc::clone(&context)));
                            }
                            Err(err) => {
                                warn!(%err, "IPC accept failed");
                            }
                        }
                    }
                }
            }
        }
        .instrument(span),
    );

    Ok(handle)
}

/// Handle a single IPC client connection.
async fn handle_connection(stream: interprocess::local_socket::tokio::Stream, context: Arc<IpcContext>) {
    let span = info_span!("ipc_conn");
    async move {
        let (reader, mut writer) = stream.split();
        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match buf_reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let response = match serde_json::from_str::<IpcRequest>(trimmed) {
                        Ok(request) => dispatch(&request, &context).await,
                        Err(err) => IpcResponse::error(format!("invalid json: {err}")),
                    };

                    let mut response_line = serde_json::to_string(&response).unwrap_or_else(|_| {
                        r#"{"ok":false,"error":"serialization failed"}"#.to_owned()
                    });
                    response_line.push('\n');

                    if let Err(err) = writer.write_all(response_line.as_bytes()).await {
                        warn!(%err, "failed to write ipc response");
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "ipc read error");
                    break;
                }
            }
        }

        info!("IPC connection closed");
    }
    .instrument(span)
    .await;
}

/// Authenticate and route one request.
pub async fn dispatch(request: &IpcRequest, context: &IpcContext) -> IpcResponse {
    let span = info_span!("ipc_command", command = %request.command);
    async move {
        if let Some(ref expected) = context.auth_token {
            match request.auth_token {
                Some(ref provided) if provided == expected => {}
                _ => {
                    warn!("IPC request rejected: invalid auth token");
                    return IpcResponse::error("unauthorized");
                }
            }
        }

        match route(request, context).await {
            Ok(response) => response,
            Err(err) => IpcResponse::error(err.to_string()),
        }
    }
    .instrument(span)
    .await
}

async fn route(request: &IpcRequest, context: &IpcContext) -> Result<IpcResponse> {
    let pool = &context.pool;
    let response = match request.command.as_str() {
        "status" => IpcResponse::from_result(Ok(pool.status().await)),
        "assign" => {
            let task = request
                .task
                .clone()
                .ok_or_else(|| missing("task"))?;
            IpcResponse::from_result(pool.assign_task(task).await)
        }
        "output" => {
            let slot = request.slot.ok_or_else(|| missing("slot"))?;
            let (bytes, position) = pool
                .output_since(slot, request.position.unwrap_or(0))
                .await?;
            IpcResponse::success(serde_json::json!({
                "output": String::from_utf8_lossy(&bytes),
                "position": position,
            }))
        }
        "input" => {
            let slot = request.slot.ok_or_else(|| missing("slot"))?;
            let text = request.text.as_deref().ok_or_else(|| missing("text"))?;
            pool.send_input(slot, text).await?;
            IpcResponse::success(serde_json::json!({ "slot": slot, "sent": true }))
        }
        "reset" => {
            let slot = request.slot.ok_or_else(|| missing("slot"))?;
            pool.reset_slot(slot).await?;
            IpcResponse::success(serde_json::json!({ "slot": slot, "status": "idle" }))
        }
        "kill_all" => {
            let dropped = pool.kill_all().await;
            IpcResponse::success(serde_json::json!({ "dropped_queued": dropped }))
        }
        "approve" => {
            let id = task_id(request)?;
            let destination = pool.approve(&id).await?;
            IpcResponse::success(serde_json::json!({
                "task_id": id,
                "status": "approved",
                "destination": destination,
            }))
        }
        "reject" => {
            let id = task_id(request)?;
            pool.reject(&id).await?;
            IpcResponse::success(serde_json::json!({ "task_id": id, "status": "rejected" }))
        }
        "artifact" => {
            let path = request.path.as_deref().ok_or_else(|| missing("path"))?;
            let content = pool.read_artifact(&target(request)?, path).await?;
            IpcResponse::success(serde_json::json!({ "path": path, "content": content }))
        }
        "artifacts" => IpcResponse::from_result(pool.list_artifacts(&target(request)?).await),
        "results" => IpcResponse::from_result(Ok(pool.completed_results().await)),
        "cleanup" => {
            let id = task_id(request)?;
            let removed = pool.cleanup_workspace(&id).await?;
            IpcResponse::success(serde_json::json!({ "task_id": id, "removed": removed }))
        }
        "classify" => classify(request, context).await?,
        other => IpcResponse::error(format!("unknown command: {other}")),
    };
    Ok(response)
}

async fn classify(request: &IpcRequest, context: &IpcContext) -> Result<IpcResponse> {
    let text = request.text.as_deref().ok_or_else(|| missing("text"))?;
    let classification = context.classifier.classify(text, &[]).await;

    let assignment = if request.submit && classification.action == ClassifierAction::AutoAdd {
        let id = TaskId::parse(&uuid::Uuid::new_v4().simple().to_string())?;
        let task = classification.to_task(id)?;
        info!(task_id = %task.id, "classified input submitted as task");
        Some(context.pool.assign_task(task).await?)
    } else {
        None
    };

    Ok(IpcResponse::success(serde_json::json!({
        "classifier": context.classifier.variant(),
        "classification": classification,
        "assignment": assignment,
    })))
}

fn missing(field: &str) -> AppError {
    AppError::InvalidState(format!("missing required '{field}' field"))
}

fn task_id(request: &IpcRequest) -> Result<TaskId> {
    TaskId::parse(request.task_id.as_deref().ok_or_else(|| missing("task_id"))?)
}

fn target(request: &IpcRequest) -> Result<ArtifactTarget> {
    match (request.slot, request.task_id.as_deref()) {
        (_, Some(id)) => Ok(ArtifactTarget::Task(TaskId::parse(id)?)),
        (Some(slot), None) => Ok(ArtifactTarget::Slot(slot)),
        (None, None) => Err(AppError::InvalidState(
            "artifact commands need 'slot' or 'task_id'".into(),
        )),
    }
}
