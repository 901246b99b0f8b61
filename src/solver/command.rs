//! Solver backed by an external CLI reading the prompt on stdin.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::Solver;
use crate::{AppError, Result};

/// Runs `program args...`, writes the combined prompt to stdin, and takes
/// stdout as the answer.
#[derive(Debug, Clone)]
pub struct CommandSolver {
    program: String,
    args: Vec<String>,
}

impl CommandSolver {
    /// Create a solver for the given command line.
    #[must_use]
    pub fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }
}

impl Solver for CommandSolver {
    fn name(&self) -> &str {
        &self.program
    }

    fn solve<'a>(
        &'a self,
        system_prompt: &'a str,
        user_prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let mut child = Command::new(&self.program)
                .args(&self.args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|err| {
                    AppError::Solver(format!("failed to start {}: {err}", self.program))
                })?;

            if let Some(mut stdin) = child.stdin.take() {
                let prompt = format!("{system_prompt}\n\n{user_prompt}\n");
                stdin.write_all(prompt.as_bytes()).await.map_err(|err| {
                    AppError::Solver(format!("failed to send prompt to {}: {err}", self.program))
                })?;
                // Dropping stdin signals end of input.
            }

            let output = child.wait_with_output().await.map_err(|err| {
                AppError::Solver(format!("failed to wait for {}: {err}", self.program))
            })?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(AppError::Solver(format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    stderr.trim()
                )));
            }

            let answer = String::from_utf8_lossy(&output.stdout).trim().to_owned();
            if answer.is_empty() {
                return Err(AppError::Solver(format!(
                    "{} produced no output",
                    self.program
                )));
            }
            Ok(answer)
        })
    }
}
