use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use migrate_golem::adapter::{
    install_signal_handlers, is_shutdown_requested, kill_all_children, CliMigrationAdapter,
};
use migrate_golem::aggregator::RunState;
use migrate_golem::config::{self, MigrateGolemConfig};
use migrate_golem::coordinator::{self, Persistence};
use migrate_golem::correlation::PatternExtractor;
use migrate_golem::exporter::{self, RunSnapshot};
use migrate_golem::inventory;
use migrate_golem::journal;
use migrate_golem::lock;
use migrate_golem::log::{resolve_log_level, LOG_LEVEL_ENV};
use migrate_golem::preflight;
use migrate_golem::scheduler;
use migrate_golem::types::{HaltReason, WorkDescriptor};
use migrate_golem::{log_error, log_info, log_warn};

const RUNTIME_DIR: &str = ".migrate-golem";

#[derive(Parser)]
#[command(
    name = "migrate-golem",
    about = "Drive a batch of repository migrations under a concurrency ceiling"
)]
struct Cli {
    /// Project root directory (defaults to current directory)
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Path to config file (defaults to {root}/migrate-golem.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log verbosity level (error, warn, info, debug); MIGRATE_GOLEM_LOG overrides
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .migrate-golem/ and a default config
    Init,
    /// Migrate every repository in an inventory
    Run {
        /// CSV inventory of source and target repositories
        #[arg(long, required_unless_present = "retry_from", conflicts_with = "retry_from")]
        inventory: Option<PathBuf>,
        /// Re-run the failed and unstarted items of a previous snapshot
        #[arg(long)]
        retry_from: Option<PathBuf>,
        /// Override scheduler.max_concurrent
        #[arg(long)]
        max_concurrent: Option<u32>,
        /// Override output.snapshot_path
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Summarize a stored snapshot
    Status {
        /// Snapshot to read (defaults to output.snapshot_path)
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let env_level = std::env::var(LOG_LEVEL_ENV).ok();
    match resolve_log_level(&cli.log_level, env_level.as_deref()) {
        Ok(level) => migrate_golem::log::set_log_level(level),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    let root = &cli.root;
    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Commands::Init => handle_init(root),
        Commands::Run {
            inventory,
            retry_from,
            max_concurrent,
            snapshot,
        } => {
            handle_run(
                root,
                config_path,
                RunOptions {
                    inventory,
                    retry_from,
                    max_concurrent,
                    snapshot,
                },
            )
            .await
        }
        Commands::Status { snapshot } => handle_status(root, config_path, snapshot),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Paths from config are relative to the project root.
fn resolve_path(root: &Path, path: &str) -> PathBuf {
    root.join(path)
}

fn handle_init(root: &Path) -> Result<(), String> {
    let runtime_dir = root.join(RUNTIME_DIR);
    fs::create_dir_all(&runtime_dir)
        .map_err(|e| format!("Failed to create {}: {}", runtime_dir.display(), e))?;

    let config_path = root.join(config::CONFIG_FILE_NAME);
    if !config_path.exists() {
        fs::write(&config_path, config::default_config_toml())
            .map_err(|e| format!("Failed to write {}: {}", config_path.display(), e))?;
    }

    // Append .migrate-golem/ to .gitignore if not already present
    let gitignore_path = root.join(".gitignore");
    let gitignore_entry = ".migrate-golem/";
    let existing_gitignore = if gitignore_path.exists() {
        fs::read_to_string(&gitignore_path)
            .map_err(|e| format!("Failed to read .gitignore: {}", e))?
    } else {
        String::new()
    };

    let has_entry = existing_gitignore
        .lines()
        .any(|line| line.trim() == gitignore_entry);

    if !has_entry {
        let mut contents = existing_gitignore;
        if !contents.is_empty() && !contents.ends_with('\n') {
            contents.push('\n');
        }
        contents.push_str(gitignore_entry);
        contents.push('\n');

        fs::write(&gitignore_path, contents)
            .map_err(|e| format!("Failed to write .gitignore: {}", e))?;
    }

    println!("Initialized migrate-golem in {}", root.display());
    println!("  Created: .migrate-golem/, {}", config::CONFIG_FILE_NAME);
    println!("  Updated: .gitignore");

    Ok(())
}

struct RunOptions {
    inventory: Option<PathBuf>,
    retry_from: Option<PathBuf>,
    max_concurrent: Option<u32>,
    snapshot: Option<PathBuf>,
}

fn load_descriptors(options: &RunOptions) -> Result<Vec<WorkDescriptor>, String> {
    match (&options.inventory, &options.retry_from) {
        (Some(path), _) => {
            log_info!("[pre] Reading inventory {}", path.display());
            Ok(inventory::load_inventory(path)?)
        }
        (None, Some(path)) => {
            log_info!("[pre] Reading retry candidates from {}", path.display());
            let previous = exporter::load_snapshot(path)?;
            Ok(inventory::retry_descriptors(&previous))
        }
        (None, None) => Err("Either --inventory or --retry-from is required".to_string()),
    }
}

async fn handle_run(
    root: &Path,
    config_path: Option<&Path>,
    options: RunOptions,
) -> Result<(), String> {
    // Install signal handlers for graceful shutdown
    install_signal_handlers()?;

    log_info!("--- Migrate Golem ---");
    log_info!("");

    log_info!("[pre] Acquiring run lock...");
    let _lock = lock::try_acquire(&root.join(RUNTIME_DIR))?;

    let mut config: MigrateGolemConfig = config::load_config_from(config_path, root)?;
    if let Some(n) = options.max_concurrent {
        config.scheduler.max_concurrent = n;
    }
    let snapshot_path = match options.snapshot {
        Some(ref p) => p.clone(),
        None => resolve_path(root, &config.output.snapshot_path),
    };

    let descriptors = load_descriptors(&options)?;

    log_info!("");
    log_info!("[pre] Running preflight checks...");
    if let Err(errors) = preflight::run_preflight(&config, &descriptors) {
        log_error!("[pre] Preflight FAILED:");
        for error in &errors {
            log_error!("  {}", error);
        }
        return Err(format!(
            "{} preflight error(s); fix all issues before running",
            errors.len()
        ));
    }
    log_info!("[pre] Preflight passed.");

    let extractor = PatternExtractor::from_config(&config.tool.correlation_patterns)?;
    let adapter = CliMigrationAdapter::new(config.tool.clone(), Arc::new(extractor));
    log_info!(
        "[pre] Verifying {} {}...",
        config.tool.cli,
        config.tool.extension
    );
    adapter.verify_cli_available()?;

    log_info!("");
    log_info!(
        "[config] Scheduler: max_concurrent={}, poll_interval={}ms",
        config.scheduler.max_concurrent,
        config.scheduler.poll_interval_ms
    );
    log_info!(
        "[config] Tool: {} {}, visibility={}, wait_timeout={}min",
        config.tool.cli,
        config.tool.extension,
        config.tool.target_repo_visibility,
        config.tool.wait_timeout_minutes
    );
    log_info!("[config] Snapshot: {}", snapshot_path.display());
    log_info!("[config] Repositories: {}", descriptors.len());
    log_info!("");

    let run = RunState::new(descriptors, config.scheduler.max_concurrent, Utc::now())?;
    let run_id = run.run_id().to_string();
    log_info!("[pre] Run {}", run_id);

    let persistence = Persistence {
        checkpoint_path: Some(resolve_path(root, &config.output.checkpoint_path)),
        journal_path: Some(resolve_path(root, &config.output.journal_path)),
    };
    let (coord_handle, coord_task) = coordinator::spawn_coordinator(run, persistence);

    // Set up cancellation for graceful shutdown
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();

    // Spawn shutdown monitor that watches for signal and cancels
    tokio::spawn(async move {
        loop {
            if is_shutdown_requested() {
                cancel_clone.cancel();
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    });

    let params = scheduler::RunParams {
        poll_interval: config.scheduler.poll_interval(),
    };

    let summary =
        scheduler::run_scheduler(coord_handle, Arc::new(adapter), params, cancel).await?;

    // Kill any remaining child processes
    kill_all_children();

    // Handle is dropped with the scheduler; the coordinator exits once its channel closes
    if let Err(err) = coord_task.await {
        log_warn!("Coordinator task panicked: {:?}", err);
    }

    let snapshot = exporter::export(&summary.final_view, Utc::now())?;
    exporter::write_snapshot(&snapshot_path, &snapshot)?;
    log_info!("[export] Snapshot written to {}", snapshot_path.display());

    // Print summary
    log_info!("\n--- Run Summary ---");
    print_summary(&snapshot);
    log_info!(
        "Dispatched: {} ({} lock failure(s))",
        summary.dispatched,
        summary.lock_failures
    );
    log_info!("Halt reason: {:?}", summary.halt_reason);
    if summary.halt_reason == HaltReason::ShutdownRequested {
        log_info!(
            "Resume with: migrate-golem run --retry-from {}",
            snapshot_path.display()
        );
    }

    Ok(())
}

fn handle_status(
    root: &Path,
    config_path: Option<&Path>,
    snapshot: Option<PathBuf>,
) -> Result<(), String> {
    let config = config::load_config_from(config_path, root)?;
    let snapshot_path = match snapshot {
        Some(p) => p,
        None => resolve_path(root, &config.output.snapshot_path),
    };

    if !snapshot_path.exists() {
        println!("No snapshot at {}.", snapshot_path.display());
        return Ok(());
    }

    let snapshot = exporter::load_snapshot(&snapshot_path)?;
    println!("Run {} ({:?})", snapshot.run_id, snapshot.halt_reason);
    println!(
        "Started {}, ended {} ({}s), max_concurrent={}",
        snapshot.started_at.to_rfc3339(),
        snapshot.ended_at.to_rfc3339(),
        snapshot.duration_secs,
        snapshot.concurrency_ceiling
    );
    println!();

    println!("{:<40} {:<12} {:<18} DETAIL", "LABEL", "RESULT", "KIND");
    println!("{}", "-".repeat(90));
    for record in &snapshot.succeeded {
        let detail = record
            .correlation_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<40} {:<12} {:<18} {}",
            truncate(&record.label, 40),
            "succeeded",
            "-",
            detail
        );
    }
    for record in &snapshot.failed {
        println!(
            "{:<40} {:<12} {:<18} {}",
            truncate(&record.label, 40),
            "failed",
            record.kind.to_string(),
            record.error
        );
    }
    for record in &snapshot.incomplete {
        println!(
            "{:<40} {:<12} {:<18} -",
            truncate(&record.label, 40),
            record.state.to_string(),
            "-"
        );
    }

    println!();
    println!(
        "{} succeeded, {} failed, {} incomplete, {} total",
        snapshot.counts.succeeded,
        snapshot.counts.failed,
        snapshot.counts.incomplete,
        snapshot.total
    );
    if !snapshot.follow_up.retry_candidates.is_empty() {
        println!(
            "{} retry candidate(s): migrate-golem run --retry-from {}",
            snapshot.follow_up.retry_candidates.len(),
            snapshot_path.display()
        );
    }

    let journal_path = resolve_path(root, &config.output.journal_path);
    let recorded = journal::load_run(&journal_path, &snapshot.run_id)?;
    let finished = snapshot.counts.succeeded + snapshot.counts.failed;
    println!(
        "Journal: {} outcome(s) recorded for this run in {}",
        recorded.len(),
        journal_path.display()
    );
    if recorded.len() != finished {
        println!(
            "  Warning: snapshot lists {} finished item(s); some outcomes were not journaled",
            finished
        );
    }

    Ok(())
}

fn print_summary(snapshot: &RunSnapshot) {
    log_info!(
        "Succeeded: {}/{}",
        snapshot.counts.succeeded,
        snapshot.total
    );
    if !snapshot.failed.is_empty() {
        log_info!("Failed: {}", snapshot.counts.failed);
        for record in &snapshot.failed {
            log_info!("  {} [{}] {}", record.label, record.kind, record.error);
        }
    }
    if !snapshot.incomplete.is_empty() {
        log_info!("Not started: {}", snapshot.counts.incomplete);
    }
    log_info!("Duration: {}s", snapshot.duration_secs);
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
