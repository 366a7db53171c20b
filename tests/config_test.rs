use std::time::Duration;

use migrate_golem::config::*;

// --- defaults ---

#[test]
fn defaults_match_platform_limits() {
    let config = MigrateGolemConfig::default();
    assert_eq!(config.scheduler.max_concurrent, 5);
    assert_eq!(config.scheduler.poll_interval(), Duration::from_millis(2000));
    assert_eq!(config.tool.cli, "gh");
    assert_eq!(config.tool.extension, "ado2gh");
    assert_eq!(config.tool.target_repo_visibility, "private");
    assert!(config.tool.correlation_patterns.is_empty());
    assert_eq!(config.output.snapshot_path, "migration-snapshot.json");
}

#[test]
fn tool_durations_convert_units() {
    let tool = ToolConfig {
        command_timeout_minutes: 2,
        wait_timeout_minutes: 3,
        status_poll_seconds: 7,
        ..ToolConfig::default()
    };
    assert_eq!(tool.command_timeout(), Duration::from_secs(120));
    assert_eq!(tool.wait_timeout(), Duration::from_secs(180));
    assert_eq!(tool.status_poll_interval(), Duration::from_secs(7));
}

#[test]
fn default_config_validates() {
    assert!(validate(&MigrateGolemConfig::default()).is_ok());
}

// --- loading ---

#[test]
fn missing_default_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config(dir.path()).unwrap();
    assert_eq!(config, MigrateGolemConfig::default());
}

#[test]
fn missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("elsewhere.toml");
    let err = load_config_from(Some(&path), dir.path()).unwrap_err();
    assert!(err.contains("Config file not found"), "got: {}", err);
}

#[test]
fn partial_file_keeps_other_defaults() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(CONFIG_FILE_NAME),
        r#"
[scheduler]
max_concurrent = 3
"#,
    )
    .unwrap();

    let config = load_config(dir.path()).unwrap();
    assert_eq!(config.scheduler.max_concurrent, 3);
    assert_eq!(config.scheduler.poll_interval_ms, 2000);
    assert_eq!(config.tool, ToolConfig::default());
}

#[test]
fn custom_correlation_patterns_parse() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(CONFIG_FILE_NAME),
        r#"
[tool]
correlation_patterns = ['queued as (\S+)']
"#,
    )
    .unwrap();

    let config = load_config(dir.path()).unwrap();
    assert_eq!(config.tool.correlation_patterns, vec![r"queued as (\S+)"]);
}

#[test]
fn default_config_toml_round_trips_to_defaults() {
    let config: MigrateGolemConfig = toml::from_str(&default_config_toml()).unwrap();
    assert_eq!(config, MigrateGolemConfig::default());
}

#[test]
fn malformed_toml_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[scheduler\n").unwrap();
    let err = load_config(dir.path()).unwrap_err();
    assert!(err.contains("Failed to parse"), "got: {}", err);
}

// --- validation ---

#[test]
fn validate_collects_every_error() {
    let mut config = MigrateGolemConfig::default();
    config.scheduler.max_concurrent = 0;
    config.tool.target_repo_visibility = "secret".to_string();
    config.tool.cli = "  ".to_string();

    let errors = validate(&config).unwrap_err();
    assert_eq!(errors.len(), 3, "got: {:?}", errors);
    assert!(errors.iter().any(|e| e.contains("max_concurrent")));
    assert!(errors.iter().any(|e| e.contains("target_repo_visibility")));
    assert!(errors.iter().any(|e| e.contains("tool.cli")));
}

#[test]
fn validate_rejects_pattern_without_capture_group() {
    let mut config = MigrateGolemConfig::default();
    config.tool.correlation_patterns = vec![r"RM_\w+".to_string()];
    let errors = validate(&config).unwrap_err();
    assert!(errors[0].contains("no capture group"), "got: {:?}", errors);
}

#[test]
fn validate_rejects_invalid_regex() {
    let mut config = MigrateGolemConfig::default();
    config.tool.correlation_patterns = vec!["(unclosed".to_string()];
    let errors = validate(&config).unwrap_err();
    assert!(errors[0].contains("Invalid correlation pattern"), "got: {:?}", errors);
}

#[test]
fn load_rejects_zero_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(CONFIG_FILE_NAME),
        "[scheduler]\nmax_concurrent = 0\n",
    )
    .unwrap();
    let err = load_config(dir.path()).unwrap_err();
    assert!(err.contains("Config validation failed"), "got: {}", err);
    assert!(err.contains("max_concurrent"), "got: {}", err);
}
