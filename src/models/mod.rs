//! Domain model module declarations.

pub mod result;
pub mod slot;
pub mod snapshot;
pub mod task;

pub use result::{CompletedResult, CompletedResults, CompletionStatus};
pub use slot::{SlotSnapshot, SlotStatus};
pub use snapshot::{Assignment, PoolStatusSnapshot};
pub use task::{Task, TaskCategory, TaskId, TaskStatus};
