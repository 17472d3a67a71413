use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::ftp::BatchItem;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Completed,
    Cancelled,
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TransferLogEntry {
    pub timestamp: String,
    pub id: String,
    pub host: String,
    pub remote: String,
    pub local: Option<String>,
    pub status: TransferStatus,
    pub bytes: u64,
    pub error: Option<String>,
}

impl TransferLogEntry {
    pub fn from_item(host: &str, remote: &str, item: &BatchItem) -> Self {
        let (local, status, bytes, error) = match item {
            BatchItem::Done(o) => (Some(o.local.clone()), TransferStatus::Completed, o.bytes, None),
            BatchItem::Cancelled => (None, TransferStatus::Cancelled, 0, None),
            BatchItem::Failed(e) => (None, TransferStatus::Failed, 0, Some(e.clone())),
        };
        Self {
            timestamp: Utc::now().to_rfc3339(),
            id: uuid::Uuid::new_v4().to_string(),
            host: host.to_string(),
            remote: remote.to_string(),
            local,
            status,
            bytes,
            error,
        }
    }
}

/// Append-only JSONL download history
pub struct TransferLog {
    log_file_path: PathBuf,
}

impl TransferLog {
    pub fn new(path: &Path) -> Self {
        TransferLog {
            log_file_path: path.to_path_buf(),
        }
    }

    pub fn add_entry(&self, entry: &TransferLogEntry) -> Result<()> {
        if let Some(dir) = self.log_file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).ok();
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file_path)
            .context("Failed to open transfer log file")?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_log(&self) -> Result<Vec<TransferLogEntry>> {
        if !self.log_file_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.log_file_path)
            .context("Failed to open transfer log file for reading")?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: TransferLogEntry = serde_json::from_str(&line)?;
            entries.push(entry);
        }
        Ok(entries)
    }
}
