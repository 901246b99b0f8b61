#![forbid(unsafe_code)]

//! `shadow-pool`: a task execution pool with isolated child workspaces.

pub mod audit;
pub mod classifier;
pub mod config;
pub mod errors;
pub mod handoff;
pub mod ipc;
pub mod mode;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod runner;
pub mod script;
pub mod solver;
pub mod store;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
pub use orchestrator::{ArtifactTarget, Pool, PoolServices};
