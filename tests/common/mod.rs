#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use migrate_golem::adapter::MigrationAdapter;
use migrate_golem::aggregator::RunState;
use migrate_golem::coordinator::{spawn_coordinator, Persistence};
use migrate_golem::mg_error::MgError;
use migrate_golem::scheduler::{run_scheduler, RunParams, RunSummary};
use migrate_golem::types::{SourceRepo, TargetRepo, WorkDescriptor};

/// Poll interval used by scheduler tests; short so tests finish quickly.
pub const FAST_POLL: Duration = Duration::from_millis(5);

/// A fixed timestamp (2026-02-10T00:00:00Z) for deterministic state tests.
pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 10, 0, 0, 0).unwrap()
}

/// Creates a `WorkDescriptor` migrating `contoso/Platform/{repo}` to `contoso-gh/{repo}`.
///
/// The source and target share the repository name, which is what the mock
/// adapter's behaviors are keyed by.
pub fn descriptor(repo: &str) -> WorkDescriptor {
    WorkDescriptor::new(
        SourceRepo {
            org: "contoso".to_string(),
            project: "Platform".to_string(),
            repo: repo.to_string(),
        },
        TargetRepo {
            org: "contoso-gh".to_string(),
            repo: repo.to_string(),
        },
    )
}

/// Descriptors for `repo-01` .. `repo-{n}`, zero-padded so they sort in input order.
pub fn descriptors(n: usize) -> Vec<WorkDescriptor> {
    (1..=n).map(|i| descriptor(&repo_name(i))).collect()
}

pub fn repo_name(i: usize) -> String {
    format!("repo-{:02}", i)
}

pub fn run_state(descriptors: Vec<WorkDescriptor>, ceiling: u32) -> RunState {
    RunState::new(descriptors, ceiling, fixed_time()).expect("valid run state")
}

/// Spawn a coordinator for `descriptors` and run the scheduler to completion.
pub async fn run_with<A: MigrationAdapter + 'static>(
    descriptors: Vec<WorkDescriptor>,
    ceiling: u32,
    adapter: Arc<A>,
    cancel: CancellationToken,
) -> Result<RunSummary, MgError> {
    run_with_persistence(descriptors, ceiling, adapter, cancel, Persistence::none()).await
}

pub async fn run_with_persistence<A: MigrationAdapter + 'static>(
    descriptors: Vec<WorkDescriptor>,
    ceiling: u32,
    adapter: Arc<A>,
    cancel: CancellationToken,
    persistence: Persistence,
) -> Result<RunSummary, MgError> {
    let (handle, task) = spawn_coordinator(run_state(descriptors, ceiling), persistence);
    let params = RunParams {
        poll_interval: FAST_POLL,
    };
    let summary = run_scheduler(handle, adapter, params, cancel).await;
    task.await.expect("coordinator task");
    summary
}

/// Write an executable shell script into `dir` and return its path.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/bash\n{}", body)).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}
