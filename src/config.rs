use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::correlation::PatternExtractor;

pub const CONFIG_FILE_NAME: &str = "migrate-golem.toml";

const VALID_VISIBILITIES: &[&str] = &["private", "internal", "public"];

#[derive(Default, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct MigrateGolemConfig {
    pub scheduler: SchedulerConfig,
    pub tool: ToolConfig,
    pub output: OutputConfig,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Hard ceiling on concurrently in-flight migrations.
    pub max_concurrent: u32,
    /// Sleep between monitoring sweeps that harvested nothing.
    pub poll_interval_ms: u64,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ToolConfig {
    /// Binary on PATH (e.g. `gh`).
    pub cli: String,
    /// CLI extension providing lock/migrate/wait (e.g. `ado2gh`).
    pub extension: String,
    /// Upper bound on a single lock or submit command.
    pub command_timeout_minutes: u32,
    /// Upper bound on the total wait for one migration to finish.
    pub wait_timeout_minutes: u32,
    /// Interval between status queries when polling by target repository.
    pub status_poll_seconds: u64,
    pub target_repo_visibility: String,
    /// Custom correlation-id regexes; empty means the built-in patterns.
    pub correlation_patterns: Vec<String>,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub snapshot_path: String,
    pub checkpoint_path: String,
    pub journal_path: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            poll_interval_ms: 2000,
        }
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            cli: "gh".to_string(),
            extension: "ado2gh".to_string(),
            command_timeout_minutes: 10,
            wait_timeout_minutes: 240,
            status_poll_seconds: 60,
            target_repo_visibility: "private".to_string(),
            correlation_patterns: Vec::new(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            snapshot_path: "migration-snapshot.json".to_string(),
            checkpoint_path: ".migrate-golem/checkpoint.json".to_string(),
            journal_path: ".migrate-golem/journal.jsonl".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl ToolConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_minutes as u64 * 60)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_minutes as u64 * 60)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_secs(self.status_poll_seconds)
    }
}

pub fn validate(config: &MigrateGolemConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if config.scheduler.max_concurrent < 1 {
        errors.push("scheduler.max_concurrent must be >= 1".to_string());
    }

    if config.scheduler.poll_interval_ms < 1 {
        errors.push("scheduler.poll_interval_ms must be >= 1".to_string());
    }

    if config.tool.cli.trim().is_empty() {
        errors.push("tool.cli must not be empty".to_string());
    }

    if config.tool.extension.trim().is_empty() {
        errors.push("tool.extension must not be empty".to_string());
    }

    if config.tool.command_timeout_minutes < 1 {
        errors.push("tool.command_timeout_minutes must be >= 1".to_string());
    }

    if config.tool.wait_timeout_minutes < 1 {
        errors.push("tool.wait_timeout_minutes must be >= 1".to_string());
    }

    if config.tool.status_poll_seconds < 1 {
        errors.push("tool.status_poll_seconds must be >= 1".to_string());
    }

    if !VALID_VISIBILITIES.contains(&config.tool.target_repo_visibility.as_str()) {
        errors.push(format!(
            "tool.target_repo_visibility '{}' must be one of {}",
            config.tool.target_repo_visibility,
            VALID_VISIBILITIES.join(", ")
        ));
    }

    if let Err(e) = PatternExtractor::from_config(&config.tool.correlation_patterns) {
        errors.push(format!("tool.correlation_patterns: {}", e));
    }

    for (name, value) in [
        ("output.snapshot_path", &config.output.snapshot_path),
        ("output.checkpoint_path", &config.output.checkpoint_path),
        ("output.journal_path", &config.output.journal_path),
    ] {
        if value.trim().is_empty() {
            errors.push(format!("{} must not be empty", name));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

pub fn load_config(project_root: &Path) -> Result<MigrateGolemConfig, String> {
    load_config_from(None, project_root)
}

/// Load config from an explicit path, or `{project_root}/migrate-golem.toml`.
///
/// A missing default file yields defaults; a missing explicit file is an error.
pub fn load_config_from(
    config_path: Option<&Path>,
    project_root: &Path,
) -> Result<MigrateGolemConfig, String> {
    let path = match config_path {
        Some(p) => {
            if !p.exists() {
                return Err(format!("Config file not found: {}", p.display()));
            }
            p.to_path_buf()
        }
        None => {
            let default_path = project_root.join(CONFIG_FILE_NAME);
            if !default_path.exists() {
                return Ok(MigrateGolemConfig::default());
            }
            default_path
        }
    };

    let contents = std::fs::read_to_string(&path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;

    let config: MigrateGolemConfig = toml::from_str(&contents)
        .map_err(|e| format!("Failed to parse {}: {}", path.display(), e))?;

    validate(&config).map_err(|errors| {
        format!(
            "Config validation failed:\n{}",
            errors
                .iter()
                .map(|e| format!("  - {}", e))
                .collect::<Vec<_>>()
                .join("\n")
        )
    })?;

    Ok(config)
}

/// Contents written by `migrate-golem init`.
pub fn default_config_toml() -> String {
    r#"[scheduler]
max_concurrent = 5          # hard platform limit on in-flight migrations
poll_interval_ms = 2000

[tool]
cli = "gh"
extension = "ado2gh"
command_timeout_minutes = 10
wait_timeout_minutes = 240
status_poll_seconds = 60
target_repo_visibility = "private"
# correlation_patterns = ['\(ID:\s*(RM_[A-Za-z0-9_\-]+)\)']

[output]
snapshot_path = "migration-snapshot.json"
checkpoint_path = ".migrate-golem/checkpoint.json"
journal_path = ".migrate-golem/journal.jsonl"
"#
    .to_string()
}
