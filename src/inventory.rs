use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::exporter::RunSnapshot;
use crate::mg_error::MgError;
use crate::types::{SourceRepo, TargetRepo, WorkDescriptor};

/// Required columns, each with the header names accepted for it.
const REQUIRED_COLUMNS: &[(&str, &[&str])] = &[
    ("source_org", &["source_org", "org", "ado_org"]),
    (
        "source_project",
        &["source_project", "teamproject", "ado_team_project"],
    ),
    ("source_repo", &["source_repo", "repo", "ado_repo"]),
    ("target_org", &["target_org", "github_org"]),
    ("target_repo", &["target_repo", "github_repo"]),
];

/// One CSV row. Missing or blank cells become empty strings and are reported by preflight.
#[derive(Debug, Deserialize)]
struct InventoryRow {
    #[serde(default, alias = "org", alias = "ado_org")]
    source_org: String,
    #[serde(default, alias = "teamproject", alias = "ado_team_project")]
    source_project: String,
    #[serde(default, alias = "repo", alias = "ado_repo")]
    source_repo: String,
    #[serde(default, alias = "github_org")]
    target_org: String,
    #[serde(default, alias = "github_repo")]
    target_repo: String,
    #[serde(default)]
    label: Option<String>,
}

impl From<InventoryRow> for WorkDescriptor {
    fn from(row: InventoryRow) -> Self {
        WorkDescriptor {
            label: row.label.filter(|l| !l.trim().is_empty()),
            source: SourceRepo {
                org: row.source_org,
                project: row.source_project,
                repo: row.source_repo,
            },
            target: TargetRepo {
                org: row.target_org,
                repo: row.target_repo,
            },
        }
    }
}

/// Parse a CSV inventory into work descriptors, in row order.
///
/// Header names are matched case-insensitively; cells are trimmed.
pub fn parse_inventory<R: Read>(reader: R) -> Result<Vec<WorkDescriptor>, MgError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers: csv::StringRecord = csv_reader
        .headers()
        .map_err(|e| MgError::Inventory(format!("Failed to read header row: {}", e)))?
        .iter()
        .map(|h| h.to_lowercase())
        .collect();

    for (column, accepted) in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| accepted.contains(&h)) {
            return Err(MgError::Inventory(format!(
                "Missing column '{}' (accepted headers: {})",
                column,
                accepted.join(", ")
            )));
        }
    }

    let mut descriptors = Vec::new();
    for (i, record) in csv_reader.records().enumerate() {
        // Header is line 1
        let row_error = |e: csv::Error| MgError::Inventory(format!("Row {}: {}", i + 2, e));
        let mut record = record.map_err(row_error)?;

        // Short rows are padded so blank cells reach preflight; extra cells are dropped
        record.truncate(headers.len());
        while record.len() < headers.len() {
            record.push_field("");
        }

        let row: InventoryRow = record.deserialize(Some(&headers)).map_err(row_error)?;
        descriptors.push(WorkDescriptor::from(row));
    }

    Ok(descriptors)
}

pub fn load_inventory(path: &Path) -> Result<Vec<WorkDescriptor>, MgError> {
    let file = File::open(path).map_err(|e| MgError::io(path, e))?;
    parse_inventory(file).map_err(|e| match e {
        MgError::Inventory(msg) => MgError::Inventory(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}

/// Descriptors for a follow-up run: the snapshot's failed and never-started items,
/// in their original input order, keeping their labels.
pub fn retry_descriptors(snapshot: &RunSnapshot) -> Vec<WorkDescriptor> {
    let mut candidates: Vec<_> = snapshot.follow_up.retry_candidates.iter().collect();
    candidates.sort_by_key(|c| c.index);
    candidates
        .into_iter()
        .map(|c| WorkDescriptor {
            label: Some(c.label.clone()),
            source: c.source.clone(),
            target: c.target.clone(),
        })
        .collect()
}
