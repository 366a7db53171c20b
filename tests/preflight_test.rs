mod common;

use migrate_golem::config::MigrateGolemConfig;
use migrate_golem::preflight::{run_preflight, PreflightError};
use migrate_golem::types::WorkDescriptor;

use common::{descriptor, descriptors};

fn errors_for(config: &MigrateGolemConfig, inventory: &[WorkDescriptor]) -> Vec<PreflightError> {
    run_preflight(config, inventory).unwrap_err()
}

// --- Passing inventories ---

#[test]
fn preflight_valid_inventory_passes() {
    let result = run_preflight(&MigrateGolemConfig::default(), &descriptors(3));
    assert!(result.is_ok());
}

#[test]
fn preflight_same_source_into_distinct_targets_passes() {
    let mut a = descriptor("api");
    let mut b = descriptor("api");
    a.target.repo = "api-archive".to_string();
    b.target.repo = "api".to_string();

    assert!(run_preflight(&MigrateGolemConfig::default(), &[a, b]).is_ok());
}

// --- Inventory checks ---

#[test]
fn preflight_empty_inventory_fails() {
    let errors = errors_for(&MigrateGolemConfig::default(), &[]);

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].condition, "Inventory contains no repositories");
    assert_eq!(errors[0].config_location, "inventory");
}

#[test]
fn preflight_missing_fields_reported_per_row() {
    let mut incomplete = descriptor("web");
    incomplete.source.project = String::new();
    incomplete.target.org = "  ".to_string();
    let inventory = vec![descriptor("api"), incomplete];

    let errors = errors_for(&MigrateGolemConfig::default(), &inventory);

    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].condition,
        "Entry is missing source_project, target_org"
    );
    assert_eq!(errors[0].config_location, "inventory row 2");
}

#[test]
fn preflight_duplicate_label_fails() {
    let mut a = descriptor("api");
    let mut b = descriptor("web");
    a.label = Some("core".to_string());
    b.label = Some("core".to_string());

    let errors = errors_for(&MigrateGolemConfig::default(), &[a, descriptor("ops"), b]);

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].condition, "Duplicate label 'core'");
    assert_eq!(errors[0].config_location, "inventory rows 1 and 3");
}

#[test]
fn preflight_duplicate_target_is_case_insensitive() {
    let a = descriptor("api");
    let mut b = descriptor("api-legacy");
    b.target.org = "Contoso-GH".to_string();
    b.target.repo = "API".to_string();
    b.label = Some("legacy".to_string());

    let errors = errors_for(&MigrateGolemConfig::default(), &[a, b]);

    assert_eq!(errors.len(), 1);
    assert!(
        errors[0].condition.contains("appears more than once"),
        "got: {}",
        errors[0].condition
    );
    assert_eq!(errors[0].config_location, "inventory rows 1 and 2");
}

#[test]
fn preflight_third_duplicate_points_at_first_row() {
    let errors = errors_for(
        &MigrateGolemConfig::default(),
        &[descriptor("api"), descriptor("api"), descriptor("api")],
    );

    // Each repeat is reported once for its label and once for its target
    let locations: Vec<&str> = errors.iter().map(|e| e.config_location.as_str()).collect();
    assert_eq!(
        locations,
        vec![
            "inventory rows 1 and 2",
            "inventory rows 1 and 2",
            "inventory rows 1 and 3",
            "inventory rows 1 and 3",
        ]
    );
}

// --- Config checks ---

#[test]
fn preflight_reports_config_errors_with_inventory_errors() {
    let mut config = MigrateGolemConfig::default();
    config.scheduler.max_concurrent = 0;
    let mut broken = descriptor("api");
    broken.source.repo = String::new();

    let errors = errors_for(&config, &[broken]);

    assert_eq!(errors.len(), 2);
    assert!(errors[0].condition.contains("scheduler.max_concurrent"));
    assert_eq!(
        errors[0].config_location,
        "migrate-golem.toml (scheduler.max_concurrent)"
    );
    assert!(errors[1].condition.starts_with("Entry is missing source_repo"));
}

#[test]
fn preflight_config_errors_reported_for_empty_inventory() {
    let mut config = MigrateGolemConfig::default();
    config.tool.cli = String::new();

    let errors = errors_for(&config, &[]);

    assert_eq!(errors.len(), 2);
    assert!(errors[0].condition.contains("tool.cli"));
    assert_eq!(errors[1].condition, "Inventory contains no repositories");
}

// --- Display ---

#[test]
fn preflight_error_display_includes_location_and_fix() {
    let errors = errors_for(&MigrateGolemConfig::default(), &[]);
    let text = errors[0].to_string();

    assert!(text.starts_with("Preflight error: Inventory contains no repositories"));
    assert!(text.contains("\n  Config: inventory"));
    assert!(text.contains("\n  Fix: "));
}
