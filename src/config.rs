//! Global configuration parsing and validation.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mode::{ExecutionMode, PoolMode, ReleasePolicy};
use crate::{AppError, Result};

/// Watchdog budgets and kill grace period.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Wall-clock budget for streaming (interactive) children.
    #[serde(default = "default_interactive_seconds")]
    pub interactive_seconds: u64,
    /// Wall-clock budget for batch (sandboxed) children.
    #[serde(default = "default_batch_seconds")]
    pub batch_seconds: u64,
    /// Delay between the graceful and the forced termination signal.
    #[serde(default = "default_kill_grace_millis")]
    pub kill_grace_millis: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            interactive_seconds: default_interactive_seconds(),
            batch_seconds: default_batch_seconds(),
            kill_grace_millis: default_kill_grace_millis(),
        }
    }
}

fn default_interactive_seconds() -> u64 {
    300
}

fn default_batch_seconds() -> u64 {
    120
}

fn default_kill_grace_millis() -> u64 {
    2000
}

/// Background loop tick intervals.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct IntervalConfig {
    /// Fixed-pool harvester/assigner tick.
    #[serde(default = "default_harvest_millis")]
    pub harvest_millis: u64,
    /// Dynamic-mode task store poll tick.
    #[serde(default = "default_poll_millis")]
    pub poll_millis: u64,
    /// Dynamic-mode execution health monitor tick.
    #[serde(default = "default_monitor_millis")]
    pub monitor_millis: u64,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            harvest_millis: default_harvest_millis(),
            poll_millis: default_poll_millis(),
            monitor_millis: default_monitor_millis(),
        }
    }
}

fn default_harvest_millis() -> u64 {
    1000
}

fn default_poll_millis() -> u64 {
    3000
}

fn default_monitor_millis() -> u64 {
    2000
}

/// OS-level limits applied inside batch children.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SandboxConfig {
    /// CPU-time cap in seconds; 0 disables the cap.
    #[serde(default = "default_cpu_limit_seconds")]
    pub cpu_limit_seconds: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            cpu_limit_seconds: default_cpu_limit_seconds(),
        }
    }
}

fn default_cpu_limit_seconds() -> u64 {
    90
}

/// External solver invoked by the child runner.
///
/// Embedded verbatim into every task program, so it is serializable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SolverConfig {
    /// OpenAI-compatible chat completions endpoint.
    Http {
        /// Completions URL.
        #[serde(default = "default_solver_url")]
        url: String,
        /// Model name sent with each request.
        #[serde(default = "default_solver_model")]
        model: String,
        /// Completion token cap.
        #[serde(default = "default_max_tokens")]
        max_tokens: u32,
        /// Sampling temperature.
        #[serde(default = "default_temperature")]
        temperature: f32,
        /// Per-request timeout.
        #[serde(default = "default_request_timeout_seconds")]
        request_timeout_seconds: u64,
        /// Name of the environment variable holding a bearer token, if any.
        #[serde(default)]
        api_key_env: Option<String>,
    },
    /// External CLI that reads the prompt on stdin and answers on stdout.
    Command {
        /// Executable name or path.
        program: String,
        /// Arguments passed before the prompt is written to stdin.
        #[serde(default)]
        args: Vec<String>,
    },
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self::Http {
            url: default_solver_url(),
            model: default_solver_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            request_timeout_seconds: default_request_timeout_seconds(),
            api_key_env: None,
        }
    }
}

fn default_solver_url() -> String {
    "http://127.0.0.1:8317/v1/chat/completions".into()
}

fn default_solver_model() -> String {
    "gemini-2.5-flash".into()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.4
}

fn default_request_timeout_seconds() -> u64 {
    120
}

/// External task store used by dynamic mode.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StoreConfig {
    /// `SQLite` file; defaults to `<workspace_root>/shadow.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Lowest priority the poller picks up.
    #[serde(default = "default_min_priority")]
    pub min_priority: u8,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            min_priority: default_min_priority(),
        }
    }
}

fn default_min_priority() -> u8 {
    5
}

/// Fire-and-forget desktop notification command.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct NotifyConfig {
    /// Command and leading arguments; the message is appended. Empty disables.
    #[serde(default)]
    pub command: Vec<String>,
}

/// Pool event journal.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AuditConfig {
    /// Whether journal entries are written.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Journal directory; defaults to `<workspace_root>/logs`.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_slot_count() -> usize {
    5
}

fn default_max_parallel() -> usize {
    5
}

fn default_queue_capacity() -> usize {
    100
}

fn default_completed_capacity() -> usize {
    50
}

fn default_output_buffer_bytes() -> usize {
    256 * 1024
}

fn default_ipc_name() -> String {
    "shadow-pool".into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Root directory holding every task workspace.
    pub workspace_root: PathBuf,
    /// Destination for approved workspaces.
    #[serde(default)]
    pub approved_root: Option<PathBuf>,
    /// Pool topology.
    #[serde(default)]
    pub mode: PoolMode,
    /// Output capture mode; defaults per topology.
    #[serde(default)]
    pub execution_mode: Option<ExecutionMode>,
    /// Number of slots in fixed mode.
    #[serde(default = "default_slot_count")]
    pub slot_count: usize,
    /// Maximum concurrent executions in dynamic mode.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Overflow queue bound; 0 means unbounded.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Completed-results ring buffer capacity.
    #[serde(default = "default_completed_capacity")]
    pub completed_capacity: usize,
    /// Per-slot output buffer bound in bytes.
    #[serde(default = "default_output_buffer_bytes")]
    pub output_buffer_bytes: usize,
    /// When finished slots may be reused.
    #[serde(default)]
    pub release_policy: ReleasePolicy,
    /// Named pipe / Unix socket identifier.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Child launcher; the program path is appended. Empty means
    /// `<current executable> child`.
    #[serde(default)]
    pub child_command: Vec<String>,
    /// Extra environment variables allowed into children.
    #[serde(default)]
    pub passthrough_env: Vec<String>,
    /// Watchdog budgets.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Background loop intervals.
    #[serde(default)]
    pub intervals: IntervalConfig,
    /// Child resource limits.
    #[serde(default)]
    pub sandbox: SandboxConfig,
    /// Solver invoked inside children.
    #[serde(default)]
    pub solver: SolverConfig,
    /// Task store settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Notification command.
    #[serde(default)]
    pub notify: NotifyConfig,
    /// Event journal settings.
    #[serde(default)]
    pub audit: AuditConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Effective execution mode after applying the per-topology default.
    #[must_use]
    pub fn execution_mode(&self) -> ExecutionMode {
        self.execution_mode
            .unwrap_or_else(|| ExecutionMode::default_for(self.mode))
    }

    /// Watchdog budget for the given execution mode.
    #[must_use]
    pub fn budget_for(&self, mode: ExecutionMode) -> Duration {
        match mode {
            ExecutionMode::Streaming => Duration::from_secs(self.timeouts.interactive_seconds),
            ExecutionMode::Batch => Duration::from_secs(self.timeouts.batch_seconds),
        }
    }

    /// Grace period between SIGTERM and SIGKILL.
    #[must_use]
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.timeouts.kill_grace_millis)
    }

    /// Directory approved workspaces are copied into.
    #[must_use]
    pub fn approved_root(&self) -> PathBuf {
        self.approved_root
            .clone()
            .unwrap_or_else(|| self.workspace_root.join("approved"))
    }

    /// Directory holding the event journal.
    #[must_use]
    pub fn audit_log_dir(&self) -> PathBuf {
        self.audit
            .log_dir
            .clone()
            .unwrap_or_else(|| self.workspace_root.join("logs"))
    }

    /// Path of the `SQLite` task store.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| self.workspace_root.join("shadow.db"))
    }

    /// Resolve the child launcher into an executable plus leading arguments.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if no launcher is configured and the
    /// current executable path cannot be determined.
    pub fn child_launcher(&self) -> Result<(PathBuf, Vec<String>)> {
        if let Some((program, args)) = self.child_command.split_first() {
            return Ok((PathBuf::from(program), args.to_vec()));
        }
        let exe = env::current_exe()
            .map_err(|err| AppError::Config(format!("cannot locate current executable: {err}")))?;
        Ok((exe, vec!["child".to_owned()]))
    }

    fn validate(&mut self) -> Result<()> {
        if self.slot_count == 0 {
            return Err(AppError::Config("slot_count must be greater than zero".into()));
        }
        if self.max_parallel == 0 {
            return Err(AppError::Config(
                "max_parallel must be greater than zero".into(),
            ));
        }
        if self.completed_capacity == 0 {
            return Err(AppError::Config(
                "completed_capacity must be greater than zero".into(),
            ));
        }
        if self.output_buffer_bytes == 0 {
            return Err(AppError::Config(
                "output_buffer_bytes must be greater than zero".into(),
            ));
        }
        if self.timeouts.interactive_seconds == 0 || self.timeouts.batch_seconds == 0 {
            return Err(AppError::Config(
                "watchdog budgets must be greater than zero".into(),
            ));
        }
        if !(1..=10).contains(&self.store.min_priority) {
            return Err(AppError::Config(
                "store.min_priority must be within 1..=10".into(),
            ));
        }

        fs::create_dir_all(&self.workspace_root)
            .map_err(|err| AppError::Config(format!("workspace_root invalid: {err}")))?;
        let canonical_root = self
            .workspace_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("workspace_root invalid: {err}")))?;
        self.workspace_root = canonical_root;

        Ok(())
    }
}
