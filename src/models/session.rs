use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// One recording run: a subject, the moment the file was opened, and where it lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogSession {
    pub subject_id: String,
    pub created_at: DateTime<Local>,
    pub file_path: PathBuf,
}

/// Counters describing the writer's buffer at a point in time.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogStats {
    /// Lines appended since the session started, header included.
    pub entry_count: u64,
    /// Bytes accumulated in memory and not yet written to disk.
    pub buffered_bytes: usize,
    /// Successful flushes since the session started.
    pub flush_count: u64,
}
