//! Error types shared across the pool, the child runner, and the IPC surface.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Assignment attempted on a slot that is not available.
    SlotUnavailable(String),
    /// The OS could not create the child process.
    Spawn(String),
    /// A child exceeded its wall-clock budget.
    Timeout(String),
    /// A child exited without writing its status document.
    ChildCrash(String),
    /// An artifact path resolved outside its workspace.
    AccessDenied(String),
    /// Requested slot, task, or artifact does not exist.
    NotFound(String),
    /// The overflow queue reached its configured bound.
    QueueFull(String),
    /// The task identifier is already running or queued.
    AlreadyActive(String),
    /// Operation not valid for the current slot state or pool mode.
    InvalidState(String),
    /// External task store failure.
    Store(String),
    /// External solver failure (child side only).
    Solver(String),
    /// IPC communication failure.
    Ipc(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::SlotUnavailable(msg) => write!(f, "slot unavailable: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn failed: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::ChildCrash(msg) => write!(f, "child crash: {msg}"),
            Self::AccessDenied(msg) => write!(f, "access denied: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::QueueFull(msg) => write!(f, "queue full: {msg}"),
            Self::AlreadyActive(msg) => write!(f, "already active: {msg}"),
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::Store(msg) => write!(f, "store: {msg}"),
            Self::Solver(msg) => write!(f, "solver: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Io(format!("json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(err.to_string())
        } else {
            Self::Io(err.to_string())
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::Solver(err.to_string())
    }
}
