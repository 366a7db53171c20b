use std::collections::HashSet;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::aggregator::FinalView;
use crate::mg_error::MgError;
use crate::types::{
    CorrelationId, FailureKind, HaltReason, ItemState, SourceRepo, TargetRepo, WorkItem,
};

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotCounts {
    pub succeeded: usize,
    pub failed: usize,
    pub incomplete: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SucceededRecord {
    pub index: usize,
    pub label: String,
    pub source: SourceRepo,
    pub target: TargetRepo,
    pub correlation_id: Option<CorrelationId>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRecord {
    pub index: usize,
    pub label: String,
    pub source: SourceRepo,
    pub target: TargetRepo,
    pub kind: FailureKind,
    pub error: String,
    pub correlation_id: Option<CorrelationId>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncompleteRecord {
    pub index: usize,
    pub label: String,
    pub source: SourceRepo,
    pub target: TargetRepo,
    /// State when the snapshot was taken: `pending` after a stop,
    /// `queued`/`running` only in mid-run checkpoints.
    pub state: ItemState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
}

/// An item that should be fed into a follow-up run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryCandidate {
    pub index: usize,
    pub label: String,
    pub source: SourceRepo,
    pub target: TargetRepo,
    /// `failure kind: message` for failed items, `not started` for incomplete ones.
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpSection {
    /// Labels of migrated repositories, ready for post-migration steps.
    pub eligible: Vec<String>,
    pub retry_candidates: Vec<RetryCandidate>,
}

/// Self-contained record of one run, reloadable with `load_snapshot`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub schema_version: u32,
    pub run_id: String,
    pub exported_at: DateTime<Utc>,
    pub halt_reason: HaltReason,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: i64,
    pub concurrency_ceiling: u32,
    pub total: usize,
    pub counts: SnapshotCounts,
    pub succeeded: Vec<SucceededRecord>,
    pub failed: Vec<FailedRecord>,
    pub incomplete: Vec<IncompleteRecord>,
    pub follow_up: FollowUpSection,
}

fn duration_secs(item: &WorkItem) -> Option<i64> {
    item.duration().map(|d| d.num_seconds())
}

fn succeeded_record(item: &WorkItem) -> SucceededRecord {
    SucceededRecord {
        index: item.index,
        label: item.label.clone(),
        source: item.source.clone(),
        target: item.target.clone(),
        correlation_id: item.correlation_id.clone(),
        submitted_at: item.submitted_at,
        completed_at: item.completed_at,
        duration_secs: duration_secs(item),
    }
}

fn failed_record(item: &WorkItem) -> Result<FailedRecord, MgError> {
    let failure = item.failure.as_ref().ok_or_else(|| {
        MgError::InconsistentSnapshot(format!("failed item '{}' has no failure detail", item.label))
    })?;
    Ok(FailedRecord {
        index: item.index,
        label: item.label.clone(),
        source: item.source.clone(),
        target: item.target.clone(),
        kind: failure.kind,
        error: failure.message.clone(),
        correlation_id: item.correlation_id.clone(),
        submitted_at: item.submitted_at,
        failed_at: item.completed_at,
        duration_secs: duration_secs(item),
    })
}

fn incomplete_record(item: &WorkItem) -> IncompleteRecord {
    IncompleteRecord {
        index: item.index,
        label: item.label.clone(),
        source: item.source.clone(),
        target: item.target.clone(),
        state: item.state,
        correlation_id: item.correlation_id.clone(),
    }
}

/// Build the snapshot for a final view.
///
/// Pure apart from `exported_at`: two exports of the same view differ only there.
pub fn export(view: &FinalView, exported_at: DateTime<Utc>) -> Result<RunSnapshot, MgError> {
    view.check_partition()?;

    let succeeded: Vec<SucceededRecord> = view.succeeded.iter().map(succeeded_record).collect();
    let failed = view
        .failed
        .iter()
        .map(failed_record)
        .collect::<Result<Vec<_>, _>>()?;
    let incomplete: Vec<IncompleteRecord> = view.incomplete.iter().map(incomplete_record).collect();

    let mut retry_candidates: Vec<RetryCandidate> = failed
        .iter()
        .map(|f| RetryCandidate {
            index: f.index,
            label: f.label.clone(),
            source: f.source.clone(),
            target: f.target.clone(),
            reason: format!("{}: {}", f.kind, f.error),
        })
        .collect();
    retry_candidates.extend(incomplete.iter().map(|i| RetryCandidate {
        index: i.index,
        label: i.label.clone(),
        source: i.source.clone(),
        target: i.target.clone(),
        reason: match i.state {
            ItemState::Pending => "not started".to_string(),
            other => format!("interrupted while {}", other),
        },
    }));

    let metadata = &view.metadata;
    let snapshot = RunSnapshot {
        schema_version: SNAPSHOT_SCHEMA_VERSION,
        run_id: metadata.run_id.clone(),
        exported_at,
        halt_reason: metadata.halt_reason,
        started_at: metadata.started_at,
        ended_at: metadata.ended_at,
        duration_secs: (metadata.ended_at - metadata.started_at).num_seconds(),
        concurrency_ceiling: metadata.concurrency_ceiling,
        total: metadata.total,
        counts: SnapshotCounts {
            succeeded: succeeded.len(),
            failed: failed.len(),
            incomplete: incomplete.len(),
        },
        follow_up: FollowUpSection {
            eligible: succeeded.iter().map(|s| s.label.clone()).collect(),
            retry_candidates,
        },
        succeeded,
        failed,
        incomplete,
    };

    snapshot.verify()?;
    Ok(snapshot)
}

impl RunSnapshot {
    /// Check the count invariant and that no item index is listed twice.
    pub fn verify(&self) -> Result<(), MgError> {
        let listed = self.succeeded.len() + self.failed.len() + self.incomplete.len();
        if listed != self.total {
            return Err(MgError::InconsistentSnapshot(format!(
                "succeeded ({}) + failed ({}) + incomplete ({}) != total ({})",
                self.succeeded.len(),
                self.failed.len(),
                self.incomplete.len(),
                self.total
            )));
        }

        let counts = SnapshotCounts {
            succeeded: self.succeeded.len(),
            failed: self.failed.len(),
            incomplete: self.incomplete.len(),
        };
        if counts != self.counts {
            return Err(MgError::InconsistentSnapshot(format!(
                "counts {:?} do not match listed records {:?}",
                self.counts, counts
            )));
        }

        let mut seen = HashSet::new();
        let indices = self
            .succeeded
            .iter()
            .map(|r| (r.index, &r.label))
            .chain(self.failed.iter().map(|r| (r.index, &r.label)))
            .chain(self.incomplete.iter().map(|r| (r.index, &r.label)));
        for (index, label) in indices {
            if index >= self.total {
                return Err(MgError::InconsistentSnapshot(format!(
                    "item '{}' has index {} outside run of {}",
                    label, index, self.total
                )));
            }
            if !seen.insert(index) {
                return Err(MgError::InconsistentSnapshot(format!(
                    "item '{}' (index {}) listed more than once",
                    label, index
                )));
            }
        }

        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.incomplete.is_empty() && self.halt_reason == HaltReason::AllComplete
    }
}

pub fn to_json(snapshot: &RunSnapshot) -> Result<String, MgError> {
    Ok(serde_json::to_string_pretty(snapshot)?)
}

/// Write a snapshot atomically: temp file in the same directory, fsync, rename.
pub fn write_snapshot(path: &Path, snapshot: &RunSnapshot) -> Result<(), MgError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    fs::create_dir_all(parent).map_err(|e| MgError::io(parent, e))?;

    let json = to_json(snapshot)?;

    let temp_file = NamedTempFile::new_in(parent).map_err(|e| MgError::io(parent, e))?;

    fs::write(temp_file.path(), json.as_bytes()).map_err(|e| MgError::io(temp_file.path(), e))?;

    // sync to disk before rename
    let file = fs::File::open(temp_file.path()).map_err(|e| MgError::io(temp_file.path(), e))?;
    file.sync_all()
        .map_err(|e| MgError::io(temp_file.path(), e))?;

    temp_file
        .persist(path)
        .map_err(|e| MgError::io(path, e.error))?;

    Ok(())
}

/// Read a snapshot back and verify it.
pub fn load_snapshot(path: &Path) -> Result<RunSnapshot, MgError> {
    let contents = fs::read_to_string(path).map_err(|e| MgError::io(path, e))?;
    let snapshot: RunSnapshot = serde_json::from_str(&contents)?;
    if snapshot.schema_version != SNAPSHOT_SCHEMA_VERSION {
        return Err(MgError::InconsistentSnapshot(format!(
            "{} has schema version {}, expected {}",
            path.display(),
            snapshot.schema_version,
            SNAPSHOT_SCHEMA_VERSION
        )));
    }
    snapshot.verify()?;
    Ok(snapshot)
}
