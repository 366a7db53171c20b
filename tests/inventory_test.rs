mod common;

use migrate_golem::config::MigrateGolemConfig;
use migrate_golem::exporter;
use migrate_golem::inventory::*;
use migrate_golem::mg_error::{AdapterError, MgError};
use migrate_golem::preflight::run_preflight;
use migrate_golem::types::*;

use common::{descriptors, fixed_time, run_state};

#[test]
fn parses_rows_in_order() {
    let csv = "\
source_org,source_project,source_repo,target_org,target_repo
contoso,Platform,api,contoso-gh,platform-api
contoso,Platform,web,contoso-gh,platform-web
";
    let descriptors = parse_inventory(csv.as_bytes()).unwrap();

    assert_eq!(descriptors.len(), 2);
    assert_eq!(descriptors[0].source.to_string(), "contoso/Platform/api");
    assert_eq!(descriptors[0].target.to_string(), "contoso-gh/platform-api");
    assert_eq!(descriptors[0].label, None);
    assert_eq!(descriptors[1].source.repo, "web");
}

#[test]
fn accepts_migration_tool_header_names() {
    let csv = "\
org,teamproject,repo,github_org,github_repo,url,last-push-date
contoso,Platform,api,contoso-gh,platform-api,https://dev.azure.com/contoso,2026-01-02
";
    let descriptors = parse_inventory(csv.as_bytes()).unwrap();

    assert_eq!(descriptors[0].source.org, "contoso");
    assert_eq!(descriptors[0].source.project, "Platform");
    assert_eq!(descriptors[0].target.repo, "platform-api");
}

#[test]
fn headers_are_case_insensitive_and_cells_trimmed() {
    let csv = "\
Source_Org , SOURCE_PROJECT,Source_Repo,Target_Org,Target_Repo,Label
 contoso , Platform , api , contoso-gh , platform-api ,  core-api
";
    let descriptors = parse_inventory(csv.as_bytes()).unwrap();

    assert_eq!(descriptors[0].source.org, "contoso");
    assert_eq!(descriptors[0].target.repo, "platform-api");
    assert_eq!(descriptors[0].label.as_deref(), Some("core-api"));
}

#[test]
fn blank_label_falls_back_to_target() {
    let csv = "\
source_org,source_project,source_repo,target_org,target_repo,label
contoso,Platform,api,contoso-gh,platform-api,
";
    let descriptors = parse_inventory(csv.as_bytes()).unwrap();

    assert_eq!(descriptors[0].label, None);
    assert_eq!(descriptors[0].effective_label(), "contoso-gh/platform-api");
}

#[test]
fn missing_column_is_reported() {
    let csv = "\
source_org,source_project,source_repo,target_org
contoso,Platform,api,contoso-gh
";
    let err = parse_inventory(csv.as_bytes()).unwrap_err();

    assert!(matches!(err, MgError::Inventory(_)));
    let message = err.to_string();
    assert!(message.contains("'target_repo'"), "got: {}", message);
    assert!(message.contains("github_repo"), "got: {}", message);
}

#[test]
fn short_row_leaves_fields_empty_for_preflight() {
    let csv = "\
source_org,source_project,source_repo,target_org,target_repo
contoso,Platform,api
";
    let descriptors = parse_inventory(csv.as_bytes()).unwrap();

    assert_eq!(descriptors[0].source.repo, "api");
    assert!(descriptors[0].target.org.is_empty());
    assert!(descriptors[0].target.repo.is_empty());
}

#[test]
fn short_row_between_full_rows_reaches_preflight() {
    let csv = "\
source_org,source_project,source_repo,target_org,target_repo
contoso,Platform,api,contoso-gh,platform-api
contoso,Platform,web,contoso-gh
contoso,Platform,ops,contoso-gh,platform-ops,unexpected-extra
";
    let descriptors = parse_inventory(csv.as_bytes()).unwrap();
    assert_eq!(descriptors.len(), 3);
    assert_eq!(descriptors[2].target.repo, "platform-ops");

    let errors = run_preflight(&MigrateGolemConfig::default(), &descriptors).unwrap_err();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].condition, "Entry is missing target_repo");
    assert_eq!(errors[0].config_location, "inventory row 2");
}

#[test]
fn header_only_inventory_is_empty() {
    let csv = "source_org,source_project,source_repo,target_org,target_repo\n";
    assert!(parse_inventory(csv.as_bytes()).unwrap().is_empty());
}

#[test]
fn load_inventory_prefixes_errors_with_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("repos.csv");
    std::fs::write(&path, "source_org\ncontoso\n").unwrap();

    let err = load_inventory(&path).unwrap_err();
    assert!(
        err.to_string().contains("repos.csv"),
        "got: {}",
        err
    );
}

#[test]
fn load_inventory_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_inventory(&dir.path().join("absent.csv")).unwrap_err();
    assert!(matches!(err, MgError::Io { .. }));
}

#[test]
fn retry_descriptors_keep_input_order_and_labels() {
    let mut run = run_state(descriptors(4), 2);
    // 2 fails its lock first, then 0 succeeds; 1 and 3 never start
    run.mark_queued(2, fixed_time()).unwrap();
    run.record_outcome(
        2,
        Outcome::from_error(&AdapterError::Lock("denied".to_string()), None, fixed_time()),
    )
    .unwrap();
    run.mark_queued(0, fixed_time()).unwrap();
    run.mark_running(0).unwrap();
    run.record_outcome(
        0,
        Outcome::Succeeded {
            correlation_id: None,
            completed_at: fixed_time(),
        },
    )
    .unwrap();

    let view = run.final_view(fixed_time(), HaltReason::ShutdownRequested);
    let snapshot = exporter::export(&view, fixed_time()).unwrap();
    let retry = retry_descriptors(&snapshot);

    let repos: Vec<&str> = retry.iter().map(|d| d.source.repo.as_str()).collect();
    assert_eq!(repos, vec!["repo-02", "repo-03", "repo-04"]);
    assert_eq!(retry[0].label.as_deref(), Some("contoso-gh/repo-02"));
}
