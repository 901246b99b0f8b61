//! Child side of the handoff protocol.
//!
//! Executed by `shadow-pool child <program.json>` inside a task workspace.
//! Loads the rendered program, optionally caps its own CPU time, calls the
//! solver once, writes `solution.md`, and publishes `status.json`. Progress
//! goes to `agent.log`; in streaming mode it is mirrored on stdout so the
//! parent's output buffer can relay it.

use std::io::Write as _;
use std::path::Path;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::handoff::{self, StatusDocument, StatusState, SOLUTION_FILE};
use crate::mode::ExecutionMode;
use crate::script::TaskProgram;
use crate::solver;
use crate::{AppError, Result};

/// Run the program at `program_path` to completion.
///
/// Solver failures are reported through the status document, not through
/// the return value.
///
/// # Errors
///
/// Returns an error only if the program cannot be loaded or the status
/// document cannot be written; the parent then synthesizes a failure.
pub async fn run_child(program_path: &Path) -> Result<()> {
    let program = TaskProgram::load(program_path).await?;
    let workspace = program.workspace.as_path();
    let task_id = program.task.id.as_str();
    let streaming = program.execution_mode == ExecutionMode::Streaming;

    if let Some(seconds) = program.cpu_limit_seconds {
        match apply_cpu_limit(seconds) {
            Ok(()) => log(&program, &format!("cpu limit set to {seconds}s"), false).await,
            Err(err) => log(&program, &format!("cpu limit not applied: {err}"), false).await,
        }
    }

    handoff::write_status(
        workspace,
        &StatusDocument::new(task_id, StatusState::Running, ""),
    )?;

    if streaming {
        banner(&program);
        tokio::spawn(relay_operator_input(program.clone()));
    }
    log(&program, &format!("started: {}", program.task.description), streaming).await;

    let solver = solver::from_config(&program.solver)?;
    log(&program, &format!("calling solver {}", solver.name()), streaming).await;

    let outcome = solver
        .solve(&program.system_prompt, &program.user_prompt)
        .await;

    let doc = match outcome {
        Ok(answer) => {
            write_solution(&program, &answer).await?;
            if streaming {
                emit(&format!("\n{answer}\n"));
            }
            log(&program, "solution written", streaming).await;
            StatusDocument::new(task_id, StatusState::Completed, answer)
        }
        Err(err) => {
            let diagnostic = format!("solver failed: {err}");
            write_solution(&program, &fallback_solution(&program, &diagnostic)).await?;
            log(&program, &diagnostic, streaming).await;
            StatusDocument::new(task_id, StatusState::Failed, diagnostic)
        }
    };

    let artifacts = handoff::list_artifacts(workspace).await?;
    handoff::write_status(workspace, &doc.with_artifacts(artifacts))?;
    log(&program, "status published", streaming).await;
    Ok(())
}

async fn write_solution(program: &TaskProgram, body: &str) -> Result<()> {
    let document = format!(
        "# {}\n\n_Category: {} | Priority: {}/10_\n\n{}\n",
        program.task.description.trim(),
        program.task.category.as_str(),
        program.task.priority,
        body.trim()
    );
    tokio::fs::write(program.workspace.join(SOLUTION_FILE), document)
        .await
        .map_err(|err| AppError::Io(format!("failed to write solution: {err}")))
}

fn fallback_solution(program: &TaskProgram, diagnostic: &str) -> String {
    format!(
        "The solver could not complete this task.\n\n- Task: {}\n- Reason: {diagnostic}\n\nRetry the task or handle it manually.",
        program.task.description.trim()
    )
}

/// Log a progress line; mirrored on stdout in streaming mode. Log write
/// failures are ignored, the log is not authoritative.
async fn log(program: &TaskProgram, line: &str, echo: bool) {
    let _ = handoff::append_log(&program.workspace, line).await;
    if echo {
        emit(&format!("{line}\n"));
    }
}

fn emit(text: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

fn banner(program: &TaskProgram) {
    emit(&format!(
        "== task {} ==\n{}\ncategory: {} | priority: {}/10\n\n",
        program.task.id,
        program.task.description.trim(),
        program.task.category.as_str(),
        program.task.priority
    ));
}

/// Record operator input arriving on stdin into the log.
async fn relay_operator_input(program: TaskProgram) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        log(&program, &format!("operator: {line}"), true).await;
    }
}

#[cfg(unix)]
fn apply_cpu_limit(seconds: u64) -> Result<()> {
    use nix::sys::resource::{setrlimit, Resource};

    setrlimit(Resource::RLIMIT_CPU, seconds, seconds)
        .map_err(|err| AppError::Io(format!("setrlimit failed: {err}")))
}

#[cfg(not(unix))]
fn apply_cpu_limit(_seconds: u64) -> Result<()> {
    Err(AppError::Io("cpu limits are not supported on this platform".into()))
}
