//! Transfer Log
//!
//! Rank 0 may append one JSON record per completed copy so site tooling can
//! track checkpoint overhead over time. The sink is append-only; records
//! are newline-delimited JSON.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One logged transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Operation name, "COPY" for the encode pipeline
    pub operation: String,

    /// Store base the checkpoint was encoded on
    pub store: PathBuf,

    /// Dataset directory the copy targeted
    pub directory: PathBuf,

    /// Checkpoint id
    pub checkpoint_id: u64,

    /// Start of the operation, seconds since the Unix epoch
    pub start_secs: i64,

    /// Wall-clock duration in seconds
    pub duration_secs: f64,

    /// Aggregate bytes moved across all ranks
    pub bytes: f64,
}

impl TransferRecord {
    /// Build a "COPY" record stamped with the current time minus `duration`.
    pub fn copy(store: &Path, directory: &Path, checkpoint_id: u64, duration_secs: f64, bytes: f64) -> Self {
        Self {
            operation: "COPY".to_string(),
            store: store.to_path_buf(),
            directory: directory.to_path_buf(),
            checkpoint_id,
            start_secs: Utc::now().timestamp() - duration_secs as i64,
            duration_secs,
            bytes,
        }
    }
}

/// Append-only JSON-lines sink for transfer records.
pub struct TransferLog {
    file: Mutex<File>,
}

impl TransferLog {
    /// Open (or create) the log at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Append one record.
    pub fn record(&self, record: &TransferRecord) -> Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| Error::Internal(format!("transfer record serialization failed: {e}")))?;
        let mut file = self.file.lock();
        writeln!(file, "{line}")?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
