//! JSONL journal writer with daily file rotation.

use std::{
    fs::{self, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::{NaiveDate, Utc};

use super::{AuditLogger, PoolEvent};
use crate::{AppError, Result};

struct WriterState {
    current_date: NaiveDate,
    writer: BufWriter<fs::File>,
}

/// A daily-rotating JSONL journal writer.
///
/// Appends one JSON object per line to `<log_dir>/audit-YYYY-MM-DD.jsonl`
/// and opens a new file when the calendar date changes between writes.
pub struct JsonlAuditWriter {
    log_dir: PathBuf,
    state: Mutex<Option<WriterState>>,
}

impl JsonlAuditWriter {
    /// Construct a writer that stores journals in `log_dir`, creating the
    /// directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] if the directory cannot be created.
    pub fn new(log_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&log_dir).map_err(|e| {
            AppError::Config(format!(
                "failed to create journal directory {}: {e}",
                log_dir.display()
            ))
        })?;
        Ok(Self {
            log_dir,
            state: Mutex::new(None),
        })
    }

    /// Path of the journal file for `date`.
    #[must_use]
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.log_dir.join(format!("audit-{date}.jsonl"))
    }

    fn open(path: &Path) -> Result<BufWriter<fs::File>> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| AppError::Io(format!("failed to open journal {}: {e}", path.display())))?;
        Ok(BufWriter::new(file))
    }
}

impl AuditLogger for JsonlAuditWriter {
    fn log_event(&self, event: PoolEvent) -> Result<()> {
        let today = Utc::now().date_naive();
        let line = serde_json::to_string(&event)?;

        let mut guard = self
            .state
            .lock()
            .map_err(|_| AppError::Io("journal writer mutex poisoned".into()))?;

        if guard.as_ref().is_none_or(|s| s.current_date != today) {
            *guard = Some(WriterState {
                current_date: today,
                writer: Self::open(&self.path_for(today))?,
            });
        }

        if let Some(state) = guard.as_mut() {
            writeln!(state.writer, "{line}")
                .and_then(|()| state.writer.flush())
                .map_err(|e| AppError::Io(format!("journal write failed: {e}")))?;
        }
        Ok(())
    }
}
