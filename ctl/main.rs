#![forbid(unsafe_code)]

//! `shadow-pool-ctl`: local CLI companion for `shadow-pool`.
//!
//! Connects to the IPC socket, sends one JSON command, and prints the
//! response.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use interprocess::local_socket::{traits::Stream as _, GenericNamespaced, Stream, ToNsName};

#[derive(Debug, Parser)]
#[command(
    name = "shadow-pool-ctl",
    about = "Local CLI for the shadow-pool server",
    version,
    long_about = None
)]
struct Cli {
    /// IPC socket name (must match the server's `ipc_name` config).
    #[arg(long, default_value = "shadow-pool")]
    ipc_name: String,

    /// Workspace root of the server; its `.ipc-token` file supplies the
    /// auth token.
    #[arg(long)]
    workspace_root: Option<PathBuf>,

    /// Auth token, overriding the token file.
    #[arg(long)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show slots, queue, and counters.
    Status,

    /// Submit a task.
    Assign {
        /// Task identifier.
        id: String,
        /// What to do.
        description: String,
        /// Task category.
        #[arg(long, default_value = "other")]
        category: String,
        /// Priority, 1 to 10.
        #[arg(long, default_value_t = 5)]
        priority: u8,
        /// Deadline, RFC 3339.
        #[arg(long)]
        deadline: Option<String>,
    },

    /// Print a slot's output since a position.
    Output {
        /// Slot index or execution ordinal.
        slot: usize,
        /// Absolute byte position to read from.
        #[arg(long, default_value_t = 0)]
        position: usize,
    },

    /// Send a line of operator input to a streaming slot.
    Input {
        /// Slot index.
        slot: usize,
        /// Text to send.
        text: String,
    },

    /// Kill a slot and return it to idle.
    Reset {
        /// Slot index.
        slot: usize,
    },

    /// Drop the queue and kill every child.
    KillAll,

    /// Approve a finished task's workspace (dynamic mode).
    Approve {
        /// Task identifier.
        task_id: String,
    },

    /// Reject a task (dynamic mode).
    Reject {
        /// Task identifier.
        task_id: String,
    },

    /// Print one artifact.
    Artifact {
        /// Relative path inside the workspace.
        path: String,
        /// Read from this task's workspace.
        #[arg(long, conflicts_with = "slot")]
        task_id: Option<String>,
        /// Read from this slot's workspace.
        #[arg(long)]
        slot: Option<usize>,
    },

    /// List artifacts.
    Artifacts {
        /// List this task's workspace.
        #[arg(long, conflicts_with = "slot")]
        task_id: Option<String>,
        /// List this slot's workspace.
        #[arg(long)]
        slot: Option<usize>,
    },

    /// Show recently completed results.
    Results,

    /// Delete a finished task's workspace.
    Cleanup {
        /// Task identifier.
        task_id: String,
    },

    /// Classify free-form text as a possible task.
    Classify {
        /// Text to classify.
        text: String,
        /// Submit the task when the classifier is confident.
        #[arg(long)]
        submit: bool,
    },
}

impl Command {
    fn to_request(&self) -> serde_json::Value {
        match self {
            Self::Status => serde_json::json!({ "command": "status" }),
            Self::Assign {
                id,
                description,
                category,
                priority,
                deadline,
            } => serde_json::json!({
                "command": "assign",
                "task": {
                    "id": id,
                    "description": description,
                    "category": category,
                    "priority": priority,
                    "deadline": deadline,
                },
            }),
            Self::Output { slot, position } => {
                serde_json::json!({ "command": "output", "slot": slot, "position": position })
            }
            Self::Input { slot, text } => {
                serde_json::json!({ "command": "input", "slot": slot, "text": text })
            }
            Self::Reset { slot } => serde_json::json!({ "command": "reset", "slot": slot }),
            Self::KillAll => serde_json::json!({ "command": "kill_all" }),
            Self::Approve { task_id } => {
                serde_json::json!({ "command": "approve", "task_id": task_id })
            }
            Self::Reject { task_id } => {
                serde_json::json!({ "command": "reject", "task_id": task_id })
            }
            Self::Artifact {
                path,
                task_id,
                slot,
            } => serde_json::json!({
                "command": "artifact",
                "path": path,
                "task_id": task_id,
                "slot": slot,
            }),
            Self::Artifacts { task_id, slot } => {
                serde_json::json!({ "command": "artifacts", "task_id": task_id, "slot": slot })
            }
            Self::Results => serde_json::json!({ "command": "results" }),
            Self::Cleanup { task_id } => {
                serde_json::json!({ "command": "cleanup", "task_id": task_id })
            }
            Self::Classify { text, submit } => {
                serde_json::json!({ "command": "classify", "text": text, "submit": submit })
            }
        }
    }
}

impl Cli {
    fn auth_token(&self) -> Option<String> {
        if let Some(ref token) = self.token {
            return Some(token.clone());
        }
        let root = self.workspace_root.as_ref()?;
        std::fs::read_to_string(root.join(".ipc-token"))
            .ok()
            .map(|raw| raw.trim().to_owned())
    }
}

fn main() {
    let args = Cli::parse();

    let mut request_json = args.command.to_request();
    if let Some(token) = args.auth_token() {
        request_json["auth_token"] = serde_json::Value::String(token);
    }

    match send_ipc_command(&args.ipc_name, &request_json) {
        Ok(response) => {
            if let Some(obj) = response.as_object() {
                let ok = obj
                    .get("ok")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                if ok {
                    match obj.get("data") {
                        Some(data) => print_data(&args.command, data),
                        None => println!("OK"),
                    }
                } else {
                    let err_msg = obj
                        .get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown error");
                    eprintln!("Error: {err_msg}");
                    std::process::exit(1);
                }
            } else {
                println!("{response}");
            }
        }
        Err(err) => {
            eprintln!("Failed to connect to server: {err}");
            eprintln!("Is shadow-pool running with ipc_name '{}'?", args.ipc_name);
            std::process::exit(1);
        }
    }
}

/// Raw text for output and artifact bodies, pretty JSON otherwise.
fn print_data(command: &Command, data: &serde_json::Value) {
    let field = match command {
        Command::Output { .. } => "output",
        Command::Artifact { .. } => "content",
        _ => {
            println!("{}", serde_json::to_string_pretty(data).unwrap_or_default());
            return;
        }
    };
    match data.get(field).and_then(serde_json::Value::as_str) {
        Some(text) => print!("{text}"),
        None => println!("{}", serde_json::to_string_pretty(data).unwrap_or_default()),
    }
}

/// Connect to the IPC socket, send a JSON command, and read the response.
fn send_ipc_command(
    ipc_name: &str,
    request: &serde_json::Value,
) -> std::result::Result<serde_json::Value, Box<dyn std::error::Error>> {
    let name = ipc_name.to_ns_name::<GenericNamespaced>()?;
    let mut stream = Stream::connect(name)?;

    let mut request_line = serde_json::to_string(request)?;
    request_line.push('\n');
    stream.write_all(request_line.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line)?;

    let response: serde_json::Value = serde_json::from_str(response_line.trim())?;
    Ok(response)
}
