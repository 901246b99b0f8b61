//! Task execution orchestration.
//!
//! Covers child process launch and termination, per-slot supervision,
//! the fixed slot pool, the dynamic swarm, and the facade that unifies
//! them for callers.

pub mod fixed_pool;
pub mod output;
pub mod pool;
pub mod process;
pub mod slot;
pub mod swarm;
pub mod watchdog;

use std::sync::Arc;

use tracing::info;

use crate::audit::{self, AuditLogger, PoolEvent};
use crate::models::result::{CompletedResult, CompletionStatus};
use crate::notify::{NoopNotifier, Notifier};

pub use fixed_pool::SlotPool;
pub use pool::{ArtifactTarget, Pool};
pub use slot::{ExecutionSlot, SlotSettings, WorkspaceLayout};
pub use swarm::Swarm;

/// Side channels a pool reports to. Neither may affect task state.
#[derive(Clone)]
pub struct PoolServices {
    /// Event journal, if enabled.
    pub audit: Option<Arc<dyn AuditLogger>>,
    /// Operator notifications.
    pub notifier: Arc<dyn Notifier>,
}

impl Default for PoolServices {
    fn default() -> Self {
        Self {
            audit: None,
            notifier: Arc::new(NoopNotifier),
        }
    }
}

impl PoolServices {
    /// Journal an event.
    pub fn record(&self, event: PoolEvent) {
        audit::record(self.audit.as_ref(), event);
    }

    /// Journal, log, and announce a recorded result.
    pub fn announce(&self, result: &CompletedResult) {
        info!(
            slot = result.slot_index,
            task_id = %result.task.id,
            status = ?result.status,
            "task result recorded"
        );
        self.record(PoolEvent::from_result(result));
        let verb = match result.status {
            CompletionStatus::Completed => "completed",
            CompletionStatus::Failed => "failed",
            CompletionStatus::TimedOut => "timed out",
        };
        self.notifier
            .notify(&format!("Task {} {verb}: {}", result.task.id, result.task.description));
    }
}
