use std::collections::HashMap;

use crate::config::{self, MigrateGolemConfig};
use crate::types::WorkDescriptor;

/// A single preflight validation error with actionable context.
#[derive(Debug, Clone, PartialEq)]
pub struct PreflightError {
    /// What condition failed.
    pub condition: String,
    /// Where in the config or inventory the error originates.
    pub config_location: String,
    /// How to fix it.
    pub suggested_fix: String,
}

impl std::fmt::Display for PreflightError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Preflight error: {}\n  Config: {}\n  Fix: {}",
            self.condition, self.config_location, self.suggested_fix
        )
    }
}

/// Run all preflight validation checks.
///
/// Phases:
/// 1. Structural validation of the config
/// 2. Inventory is non-empty
/// 3. Every entry has all five repository fields
/// 4. No two entries share a label or a target repository
///
/// Returns `Ok(())` if all checks pass, or `Err(Vec<PreflightError>)` with all errors.
pub fn run_preflight(
    config: &MigrateGolemConfig,
    descriptors: &[WorkDescriptor],
) -> Result<(), Vec<PreflightError>> {
    let mut errors = validate_structure(config);

    if descriptors.is_empty() {
        errors.push(PreflightError {
            condition: "Inventory contains no repositories".to_string(),
            config_location: "inventory".to_string(),
            suggested_fix: "Add at least one row with source and target repository columns"
                .to_string(),
        });
        return Err(errors);
    }

    errors.extend(validate_fields(descriptors));
    errors.extend(validate_duplicates(descriptors));

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_structure(config: &MigrateGolemConfig) -> Vec<PreflightError> {
    match config::validate(config) {
        Ok(()) => Vec::new(),
        Err(messages) => messages
            .into_iter()
            .map(|message| {
                let location = message
                    .split_whitespace()
                    .next()
                    .unwrap_or("config")
                    .trim_end_matches(':')
                    .to_string();
                PreflightError {
                    condition: message,
                    config_location: format!("{} ({})", config::CONFIG_FILE_NAME, location),
                    suggested_fix: "Correct the value in the config file or remove it to use the default"
                        .to_string(),
                }
            })
            .collect(),
    }
}

/// Entry positions are 1-based, matching the data rows of a CSV inventory.
fn validate_fields(descriptors: &[WorkDescriptor]) -> Vec<PreflightError> {
    let mut errors = Vec::new();

    for (i, d) in descriptors.iter().enumerate() {
        let fields = [
            ("source_org", &d.source.org),
            ("source_project", &d.source.project),
            ("source_repo", &d.source.repo),
            ("target_org", &d.target.org),
            ("target_repo", &d.target.repo),
        ];
        let missing: Vec<&str> = fields
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            errors.push(PreflightError {
                condition: format!("Entry is missing {}", missing.join(", ")),
                config_location: format!("inventory row {}", i + 1),
                suggested_fix: "Fill in every source and target column for this row".to_string(),
            });
        }
    }

    errors
}

fn validate_duplicates(descriptors: &[WorkDescriptor]) -> Vec<PreflightError> {
    let mut errors = Vec::new();
    let mut labels: HashMap<String, usize> = HashMap::new();
    let mut targets: HashMap<String, usize> = HashMap::new();

    for (i, d) in descriptors.iter().enumerate() {
        let row = i + 1;

        let label = d.effective_label();
        if let Some(first) = labels.insert(label.clone(), row) {
            labels.insert(label.clone(), first);
            errors.push(PreflightError {
                condition: format!("Duplicate label '{}'", label),
                config_location: format!("inventory rows {} and {}", first, row),
                suggested_fix: "Give each row a unique label (or leave labels empty)".to_string(),
            });
        }

        // GitHub org and repo names are case-insensitive
        let target = d.target.to_string().to_lowercase();
        if let Some(first) = targets.insert(target.clone(), row) {
            targets.insert(target, first);
            errors.push(PreflightError {
                condition: format!("Target repository {} appears more than once", d.target),
                config_location: format!("inventory rows {} and {}", first, row),
                suggested_fix: "Migrate each source into a distinct target repository".to_string(),
            });
        }
    }

    errors
}
