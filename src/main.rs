#![forbid(unsafe_code)]

//! `shadow-pool`: task execution pool server and child runner.
//!
//! `serve` bootstraps configuration, the task store, the pool, and the IPC
//! server for `shadow-pool-ctl`. `child` is the entry point the pool
//! launches inside each workspace.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use shadow_pool::audit::{AuditLogger, JsonlAuditWriter};
use shadow_pool::classifier::Classifier;
use shadow_pool::config::GlobalConfig;
use shadow_pool::ipc::server::{self, IpcContext};
use shadow_pool::mode::PoolMode;
use shadow_pool::store::{SqliteTaskStore, TaskStore};
use shadow_pool::{notify, runner, AppError, Pool, PoolServices, Result};

/// How long the child waits for stray blocking tasks once it is done.
const CHILD_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "shadow-pool", about = "Task execution pool", version, long_about = None)]
struct Cli {
    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the pool and its IPC server until interrupted.
    Serve {
        /// Path to the TOML configuration file.
        #[arg(long)]
        config: PathBuf,

        /// Override the configured pool topology.
        #[arg(long, value_enum)]
        mode: Option<PoolMode>,

        /// Override the configured workspace root.
        #[arg(long)]
        workspace: Option<PathBuf>,
    },

    /// Execute one rendered task program (launched by the pool).
    Child {
        /// Path to the workspace's `program.json`.
        program: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();

    match args.command {
        Command::Serve {
            config,
            mode,
            workspace,
        } => {
            init_tracing(args.log_format)?;
            info!("shadow-pool server bootstrap");
            build_runtime()?.block_on(serve(config, mode, workspace))
        }
        Command::Child { program } => {
            init_child_tracing();
            let runtime = build_runtime()?;
            let outcome = runtime.block_on(runner::run_child(&program));
            // The stdin relay may still be parked in a blocking read.
            runtime.shutdown_timeout(CHILD_SHUTDOWN_TIMEOUT);
            outcome
        }
    }
}

fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))
}

async fn serve(
    config_path: PathBuf,
    mode: Option<PoolMode>,
    workspace: Option<PathBuf>,
) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&config_path)?;
    if let Some(mode) = mode {
        config.mode = mode;
    }
    if let Some(ws) = workspace {
        std::fs::create_dir_all(&ws)?;
        config.workspace_root = ws
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid workspace override: {err}")))?;
    }
    info!(
        mode = ?config.mode,
        execution_mode = ?config.execution_mode(),
        workspace_root = %config.workspace_root.display(),
        "configuration loaded"
    );

    // ── Side channels ───────────────────────────────────
    let audit: Option<Arc<dyn AuditLogger>> = if config.audit.enabled {
        match JsonlAuditWriter::new(config.audit_log_dir()) {
            Ok(writer) => Some(Arc::new(writer)),
            Err(err) => {
                warn!(%err, "audit journal disabled");
                None
            }
        }
    } else {
        None
    };
    let services = PoolServices {
        audit,
        notifier: Arc::from(notify::from_config(&config.notify)),
    };

    // ── Task store (dynamic mode only) ──────────────────
    let store: Option<Arc<dyn TaskStore>> = match config.mode {
        PoolMode::Dynamic => {
            let store = SqliteTaskStore::open(&config.store_path()).await?;
            info!(path = %config.store_path().display(), "task store connected");
            Some(Arc::new(store))
        }
        PoolMode::Fixed => None,
    };

    // ── Pool ────────────────────────────────────────────
    let pool = Pool::from_config(&config, store, services)?;
    let loop_handles = pool.start();

    // ── IPC server ──────────────────────────────────────
    let ct = CancellationToken::new();
    let auth_token = uuid::Uuid::new_v4().to_string();
    server::write_token_file(&config.workspace_root, &auth_token)?;
    let context = Arc::new(IpcContext {
        pool: pool.clone(),
        classifier: Classifier::select(&config.solver).await,
        auth_token: Some(auth_token),
    });
    let ipc_handle = server::spawn_ipc_server(&config.ipc_name, context, ct.clone())?;

    info!("shadow-pool ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();
    pool.shutdown().await;

    if let Err(err) = ipc_handle.await {
        error!(%err, "ipc server task failed");
    }
    for handle in loop_handles {
        if let Err(err) = handle.await {
            error!(%err, "pool loop task failed");
        }
    }
    info!("shadow-pool shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}

/// Children keep stdout for the operator transcript; diagnostics go to
/// stderr, warnings only unless `RUST_LOG` says otherwise.
fn init_child_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
