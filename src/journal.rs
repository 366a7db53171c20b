use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::log_warn;
use crate::mg_error::MgError;
use crate::types::{CorrelationId, FailureKind, ItemState, WorkItem};

/// One terminal outcome, as a single JSON line in `journal.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub run_id: String,
    pub recorded_at: DateTime<Utc>,
    pub index: usize,
    pub label: String,
    pub source: String,
    pub target: String,
    pub state: ItemState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JournalEntry {
    pub fn from_item(run_id: &str, item: &WorkItem, recorded_at: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.to_string(),
            recorded_at,
            index: item.index,
            label: item.label.clone(),
            source: item.source.to_string(),
            target: item.target.to_string(),
            state: item.state,
            correlation_id: item.correlation_id.clone(),
            failure_kind: item.failure.as_ref().map(|f| f.kind),
            error: item.failure.as_ref().map(|f| f.message.clone()),
        }
    }
}

/// Append one entry to the journal.
///
/// Creates the file and parent directories if missing.
pub fn append_entry(path: &Path, entry: &JournalEntry) -> Result<(), MgError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| MgError::io(parent, e))?;
    }

    let mut line = serde_json::to_string(entry)?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map_err(|e| MgError::io(path, e))?;

    file.write_all(line.as_bytes())
        .map_err(|e| MgError::io(path, e))?;

    Ok(())
}

/// Read every entry back in write order. A missing journal is empty.
///
/// Lines that fail to parse (e.g. a torn write at crash time) are skipped with a warning.
pub fn read_entries(path: &Path) -> Result<Vec<JournalEntry>, MgError> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(MgError::io(path, e)),
    };

    let mut entries = Vec::new();
    for (line_no, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => log_warn!(
                "[journal] Skipping unreadable line {} of {}: {}",
                line_no + 1,
                path.display(),
                e
            ),
        }
    }
    Ok(entries)
}

/// Entries belonging to one run.
pub fn entries_for_run<'a>(entries: &'a [JournalEntry], run_id: &str) -> Vec<&'a JournalEntry> {
    entries.iter().filter(|e| e.run_id == run_id).collect()
}

/// Read the journal and keep only the entries of `run_id`, in write order.
pub fn load_run(path: &Path, run_id: &str) -> Result<Vec<JournalEntry>, MgError> {
    let entries = read_entries(path)?;
    Ok(entries_for_run(&entries, run_id)
        .into_iter()
        .cloned()
        .collect())
}
