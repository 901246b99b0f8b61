//! Per-assignment liveness watchdog.
//!
//! One [`Watchdog`] supervises each spawned child. It resolves on the
//! first of three triggers: the child exits by itself, the wall-clock
//! budget runs out, or the slot's kill token fires. The last two end in a
//! two-phase termination of the child.

use std::time::Duration;

use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::process;

/// Why a supervised child stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitCause {
    /// Natural exit; `None` when terminated by a signal.
    Exited(Option<i32>),
    /// The budget ran out and the watchdog terminated the child.
    TimedOut(Duration),
    /// The slot was killed explicitly.
    Killed,
    /// Waiting on the child failed.
    WaitFailed(String),
}

enum Trigger {
    Exited(std::io::Result<std::process::ExitStatus>),
    Budget,
    Kill,
}

/// Supervisor for one child process.
pub struct Watchdog {
    slot_index: usize,
    task_id: String,
    budget: Duration,
    grace: Duration,
    kill: CancellationToken,
}

impl Watchdog {
    /// Construct a watchdog (does not start supervising yet).
    #[must_use]
    pub fn new(
        slot_index: usize,
        task_id: String,
        budget: Duration,
        grace: Duration,
        kill: CancellationToken,
    ) -> Self {
        Self {
            slot_index,
            task_id,
            budget,
            grace,
            kill,
        }
    }

    /// Wait for the child to stop, terminating it when required.
    pub async fn supervise(self, mut child: Child) -> ExitCause {
        let slot = self.slot_index;
        let task_id = self.task_id.as_str();

        let trigger = tokio::select! {
            status = child.wait() => Trigger::Exited(status),
            () = tokio::time::sleep(self.budget) => Trigger::Budget,
            () = self.kill.cancelled() => Trigger::Kill,
        };

        match trigger {
            Trigger::Exited(Ok(status)) => {
                info!(slot, task_id, code = status.code(), "child exited");
                ExitCause::Exited(status.code())
            }
            Trigger::Exited(Err(err)) => {
                warn!(slot, task_id, %err, "error waiting for child process");
                process::terminate(&mut child, self.grace).await;
                ExitCause::WaitFailed(err.to_string())
            }
            Trigger::Budget => {
                warn!(
                    slot,
                    task_id,
                    budget_seconds = self.budget.as_secs(),
                    "watchdog budget exceeded, terminating child"
                );
                process::terminate(&mut child, self.grace).await;
                ExitCause::TimedOut(self.budget)
            }
            Trigger::Kill => {
                info!(slot, task_id, "kill requested, terminating child");
                process::terminate(&mut child, self.grace).await;
                ExitCause::Killed
            }
        }
    }
}
