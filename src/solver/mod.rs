//! External solver abstraction invoked from inside a child process.
//!
//! The parent never calls a solver; it only renders the solver settings
//! into the task program. The child runner resolves them with
//! [`from_config`] and makes exactly one [`Solver::solve`] call.

pub mod command;
pub mod http;

use std::future::Future;
use std::pin::Pin;

use crate::config::SolverConfig;
use crate::Result;

pub use command::CommandSolver;
pub use http::{ChatClient, HttpSolver};

/// Produces a solution text for a system/user prompt pair.
pub trait Solver: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Ask the solver for a complete answer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Solver` if the solver is unreachable, times out,
    /// or returns an unusable response.
    fn solve<'a>(
        &'a self,
        system_prompt: &'a str,
        user_prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
}

/// Build the solver described by `config`.
///
/// # Errors
///
/// Returns `AppError::Solver` if the HTTP client cannot be constructed.
pub fn from_config(config: &SolverConfig) -> Result<Box<dyn Solver>> {
    match config {
        SolverConfig::Http { .. } => Ok(Box::new(HttpSolver::from_config(config)?)),
        SolverConfig::Command { program, args } => {
            Ok(Box::new(CommandSolver::new(program.clone(), args.clone())))
        }
    }
}
