//! Best-effort operator notifications.
//!
//! Notifications never block the caller and never fail it: delivery runs
//! on a detached task and errors are only logged.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::config::NotifyConfig;

/// Longest a notification command may run before it is abandoned.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Fire-and-forget notification port.
pub trait Notifier: Send + Sync {
    /// Deliver `message` in the background.
    fn notify(&self, message: &str);
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, message: &str) {
        debug!(message, "notification discarded");
    }
}

/// Runs a configured command with the message appended as the last
/// argument, e.g. `["notify-send", "Shadow Task"]`.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    program: String,
    args: Vec<String>,
}

impl CommandNotifier {
    /// Build from a command line; `None` if it is empty.
    #[must_use]
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl Notifier for CommandNotifier {
    fn notify(&self, message: &str) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(message, "no runtime, notification dropped");
            return;
        };
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(message)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let program = self.program.clone();

        runtime.spawn(async move {
            let mut child = match cmd.spawn() {
                Ok(child) => child,
                Err(err) => {
                    debug!(program, %err, "notification command failed to start");
                    return;
                }
            };
            match tokio::time::timeout(DELIVERY_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) if !status.success() => {
                    debug!(program, %status, "notification command failed");
                }
                Ok(Err(err)) => debug!(program, %err, "notification command wait failed"),
                Err(_elapsed) => debug!(program, "notification command timed out"),
                Ok(Ok(_)) => {}
            }
        });
    }
}

/// Notifier selected by configuration.
#[must_use]
pub fn from_config(config: &NotifyConfig) -> Box<dyn Notifier> {
    match CommandNotifier::new(&config.command) {
        Some(notifier) => Box::new(notifier),
        None => Box::new(NoopNotifier),
    }
}
