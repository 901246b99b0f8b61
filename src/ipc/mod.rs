//! Local IPC layer for `shadow-pool-ctl` interaction.
//!
//! Provides a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! server that accepts JSON-line commands from the companion CLI.

pub mod server;

pub use server::{IpcContext, IpcRequest, IpcResponse};

/// File under the workspace root holding the per-instance auth token.
pub const TOKEN_FILE: &str = ".ipc-token";
