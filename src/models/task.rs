//! Task model: identity, payload, and store-facing lifecycle status.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Longest accepted task identifier.
const MAX_ID_LEN: usize = 64;

/// Opaque task identifier.
///
/// Restricted to ASCII alphanumerics, `-` and `_` because it is embedded
/// into workspace directory names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(String);

impl TaskId {
    /// Validate and wrap a raw identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` if the identifier is empty, longer
    /// than 64 characters, or contains characters outside `[A-Za-z0-9_-]`.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() || raw.len() > MAX_ID_LEN {
            return Err(AppError::InvalidState(format!(
                "task id must be 1..={MAX_ID_LEN} characters"
            )));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(AppError::InvalidState(format!(
                "task id '{raw}' contains unsupported characters"
            )));
        }
        Ok(Self(raw.to_owned()))
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TaskId {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

/// Task category; selects the solver's system prompt.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    /// Draft an email.
    Email,
    /// Write code.
    Code,
    /// Research and summarize.
    Research,
    /// Plan a schedule.
    Schedule,
    /// Prepare a call.
    Call,
    /// Compare purchase options.
    Purchase,
    /// Anything else.
    #[default]
    Other,
}

impl TaskCategory {
    /// Wire name of the category.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Code => "code",
            Self::Research => "research",
            Self::Schedule => "schedule",
            Self::Call => "call",
            Self::Purchase => "purchase",
            Self::Other => "other",
        }
    }

    /// Parse a category name, mapping unknown names to [`TaskCategory::Other`].
    #[must_use]
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "email" => Self::Email,
            "code" => Self::Code,
            "research" => Self::Research,
            "schedule" => Self::Schedule,
            "call" => Self::Call,
            "purchase" => Self::Purchase,
            _ => Self::Other,
        }
    }
}

/// A unit of work submitted for autonomous solving.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Task {
    /// Correlation key across pool, queue, and results.
    pub id: TaskId,
    /// What should be done.
    pub description: String,
    /// Category used to pick the system prompt.
    #[serde(default)]
    pub category: TaskCategory,
    /// Urgency, 1 (lowest) to 10.
    pub priority: u8,
    /// Optional deadline.
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

impl Task {
    /// Construct a validated task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` if the description is blank or the
    /// priority is outside `1..=10`.
    pub fn new(
        id: TaskId,
        description: impl Into<String>,
        category: TaskCategory,
        priority: u8,
    ) -> Result<Self> {
        let task = Self {
            id,
            description: description.into(),
            category,
            priority,
            deadline: None,
        };
        task.validate()?;
        Ok(task)
    }

    /// Attach a deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Check payload invariants.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` on a blank description or an
    /// out-of-range priority.
    pub fn validate(&self) -> Result<()> {
        if self.description.trim().is_empty() {
            return Err(AppError::InvalidState(
                "task description must not be empty".into(),
            ));
        }
        if !(1..=10).contains(&self.priority) {
            return Err(AppError::InvalidState(format!(
                "task priority {} outside 1..=10",
                self.priority
            )));
        }
        Ok(())
    }
}

/// Lifecycle status as recorded in the external task store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be picked up.
    Pending,
    /// An execution is running.
    Active,
    /// The solver produced a result.
    Completed,
    /// The execution failed or timed out.
    Failed,
    /// An operator accepted the artifacts.
    Approved,
    /// An operator discarded the result.
    Rejected,
}

impl TaskStatus {
    /// Wire name of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    /// Parse a stored status string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` for unknown values.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(AppError::Store(format!("invalid task status: {other}"))),
        }
    }
}
