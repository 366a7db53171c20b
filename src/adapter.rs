use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use nix::unistd::Pid;
use serde::Deserialize;
use tokio::sync::oneshot;

use crate::config::ToolConfig;
use crate::correlation::CorrelationExtractor;
use crate::mg_error::AdapterError;
use crate::types::{CorrelationId, Outcome, SourceRepo, TargetRepo};
use crate::{log_debug, log_warn};

/// Maximum time to wait for graceful shutdown after SIGTERM before sending SIGKILL.
const SIGTERM_GRACE_PERIOD_SECONDS: u64 = 5;

/// Polling interval when waiting for a process group to exit after SIGTERM.
const KILL_POLL_INTERVAL_MS: u64 = 100;

/// How much trailing tool output to keep in an error message.
const ERROR_TAIL_CHARS: usize = 400;

const MIGRATION_STATUS_QUERY: &str = "query($org: String!, $repo: String!) { \
     organization(login: $org) { \
     repositoryMigrations(last: 1, repositoryName: $repo) { \
     nodes { id state failureReason } } } }";

/// Global shutdown flag shared with signal handlers.
fn shutdown_flag() -> &'static Arc<AtomicBool> {
    static FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();
    FLAG.get_or_init(|| Arc::new(AtomicBool::new(false)))
}

/// Check if a shutdown has been requested via signal.
pub fn is_shutdown_requested() -> bool {
    shutdown_flag().load(Ordering::Relaxed)
}

/// Install signal handlers for SIGTERM and SIGINT that set the shutdown flag.
///
/// Call once at program startup. Subsequent calls are safe (re-registers handlers).
pub fn install_signal_handlers() -> Result<(), String> {
    let flag = Arc::clone(shutdown_flag());
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&flag))
        .map_err(|e| format!("Failed to register SIGTERM handler: {}", e))?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, flag)
        .map_err(|e| format!("Failed to register SIGINT handler: {}", e))?;
    Ok(())
}

// --- Process Registry ---

/// Global registry of active child process group IDs.
///
/// Uses `std::sync::Mutex` (not tokio's) because operations are fast
/// (insert/remove/iterate) with no I/O under the lock.
fn process_registry() -> &'static Arc<std::sync::Mutex<HashSet<Pid>>> {
    static REGISTRY: OnceLock<Arc<std::sync::Mutex<HashSet<Pid>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Arc::new(std::sync::Mutex::new(HashSet::new())))
}

pub fn register_child(pgid: Pid) {
    if let Ok(mut registry) = process_registry().lock() {
        registry.insert(pgid);
    }
}

pub fn unregister_child(pgid: Pid) {
    if let Ok(mut registry) = process_registry().lock() {
        registry.remove(&pgid);
    }
}

/// Kill all registered child process groups.
///
/// Only called once the scheduler has drained; anything still registered is a straggler.
/// Sends SIGTERM, waits for the grace period, then SIGKILLs survivors.
pub fn kill_all_children() {
    use nix::sys::signal::{killpg, Signal};

    let pgids: Vec<Pid> = {
        let Ok(registry) = process_registry().lock() else {
            return;
        };
        registry.iter().copied().collect()
    };

    if pgids.is_empty() {
        return;
    }

    for &pgid in &pgids {
        let _ = killpg(pgid, Signal::SIGTERM);
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(SIGTERM_GRACE_PERIOD_SECONDS);
    let poll_interval = Duration::from_millis(KILL_POLL_INTERVAL_MS);

    while std::time::Instant::now() < deadline {
        let all_gone = pgids
            .iter()
            .all(|&pgid| matches!(killpg(pgid, None), Err(nix::errno::Errno::ESRCH)));
        if all_gone {
            break;
        }
        std::thread::sleep(poll_interval);
    }

    for &pgid in &pgids {
        let _ = killpg(pgid, Signal::SIGKILL);
    }

    if let Ok(mut registry) = process_registry().lock() {
        registry.clear();
    }
}

// --- Adapter trait ---

/// The external lock/migrate/wait primitives for one repository.
///
/// Implementations must report every failure as an `AdapterError`, never panic.
pub trait MigrationAdapter: Send + Sync {
    /// Put the source repository into a read-only state.
    fn lock(&self, source: &SourceRepo) -> impl Future<Output = Result<(), AdapterError>> + Send;

    /// Queue the migration. `Ok(None)` means it was queued but no id could be parsed.
    fn submit_migration(
        &self,
        source: &SourceRepo,
        target: &TargetRepo,
    ) -> impl Future<Output = Result<Option<CorrelationId>, AdapterError>> + Send;

    /// Wait for the migration to finish, by id when known, otherwise by target.
    fn await_completion(
        &self,
        correlation_id: Option<&CorrelationId>,
        target: &TargetRepo,
    ) -> impl Future<Output = Result<DateTime<Utc>, AdapterError>> + Send;
}

/// Submit and wait for one already-locked item, returning its terminal outcome.
///
/// The correlation id (or `None`) is sent on `ack` as soon as submission is
/// acknowledged so the coordinator can record it before the wait finishes.
pub async fn submit_and_wait<A: MigrationAdapter + ?Sized>(
    adapter: &A,
    source: &SourceRepo,
    target: &TargetRepo,
    ack: oneshot::Sender<Option<CorrelationId>>,
) -> Outcome {
    let correlation_id = match adapter.submit_migration(source, target).await {
        Ok(id) => id,
        Err(e) => return Outcome::from_error(&e, None, Utc::now()),
    };

    // Receiver may already be gone if the scheduler is shutting down; the outcome still carries the id
    let _ = ack.send(correlation_id.clone());

    match adapter
        .await_completion(correlation_id.as_ref(), target)
        .await
    {
        Ok(completed_at) => Outcome::Succeeded {
            correlation_id,
            completed_at,
        },
        Err(e) => Outcome::from_error(&e, correlation_id, Utc::now()),
    }
}

/// The full per-item sequence run inside a scheduler slot: lock, submit, wait.
///
/// `locked` fires once the lock succeeds. On a lock failure both senders are
/// dropped unsent and the outcome is `Failed(LockFailure)`.
pub async fn lock_and_migrate<A: MigrationAdapter + ?Sized>(
    adapter: &A,
    source: &SourceRepo,
    target: &TargetRepo,
    locked: oneshot::Sender<()>,
    ack: oneshot::Sender<Option<CorrelationId>>,
) -> Outcome {
    if let Err(e) = adapter.lock(source).await {
        return Outcome::from_error(&e, None, Utc::now());
    }
    let _ = locked.send(());

    submit_and_wait(adapter, source, target, ack).await
}

// --- Subprocess plumbing ---

/// Captured result of one tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// stdout followed by stderr; the migration CLI logs to both.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Short description of a failed invocation for error messages.
    pub fn failure_summary(&self) -> String {
        let exit = match self.code {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        };
        let combined = self.combined();
        let tail = tail_chars(combined.trim(), ERROR_TAIL_CHARS);
        if tail.is_empty() {
            exit
        } else {
            format!("{}: {}", exit, tail)
        }
    }
}

fn tail_chars(s: &str, max: usize) -> &str {
    let count = s.chars().count();
    if count <= max {
        return s;
    }
    let skip = count - max;
    match s.char_indices().nth(skip) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// Spawn a tool subprocess in its own process group, capture its output, enforce `timeout`.
///
/// The child's process group isolates it from terminal SIGINT so a Ctrl-C
/// never abandons a migration mid-flight; the scheduler drains instead.
pub async fn run_tool_command(
    mut cmd: tokio::process::Command,
    timeout: Duration,
) -> Result<ToolOutput, String> {
    // stdin MUST be null: with setpgid the child is in a background process group,
    // and any attempt to read from the terminal would cause SIGTTIN (silent stop).
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    // SAFETY: pre_exec runs between fork() and exec() where only async-signal-safe
    // functions are permitted. setpgid is async-signal-safe per POSIX.
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setpgid(nix::unistd::Pid::from_raw(0), nix::unistd::Pid::from_raw(0))
                .map_err(std::io::Error::other)?;
            Ok(())
        });
    }

    let child = cmd
        .spawn()
        .map_err(|e| format!("Failed to spawn subprocess: {}", e))?;

    let child_pid = child
        .id()
        .ok_or_else(|| "Failed to get child PID".to_string())? as i32;
    let pgid = Pid::from_raw(child_pid);
    log_debug!("[tool] Subprocess spawned (pid={})", child_pid);

    register_child(pgid);

    let wait_result = tokio::time::timeout(timeout, child.wait_with_output()).await;

    match wait_result {
        Err(_) => {
            // The dropped future kills the leader (kill_on_drop); take down the rest of the group
            log_debug!(
                "[tool] TIMEOUT after {}s, killing process group",
                timeout.as_secs()
            );
            kill_process_group(child_pid).await;
            unregister_child(pgid);
            Err(format!("Command timed out after {} seconds", timeout.as_secs()))
        }
        Ok(output) => {
            unregister_child(pgid);
            let output = output.map_err(|e| format!("Error waiting for subprocess: {}", e))?;
            log_debug!("[tool] Subprocess exited (status={:?})", output.status.code());
            Ok(ToolOutput {
                success: output.status.success(),
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

/// Kill a process group by PID. Sends SIGTERM, polls for exit, then SIGKILL if needed.
///
/// The blocking poll-and-sleep loop runs on the tokio blocking thread pool
/// via `spawn_blocking` to avoid stalling async worker threads.
async fn kill_process_group(pgid: i32) {
    tokio::task::spawn_blocking(move || {
        use nix::sys::signal::{killpg, Signal};

        let pgid = Pid::from_raw(pgid);

        if let Err(nix::errno::Errno::ESRCH) = killpg(pgid, Signal::SIGTERM) {
            return;
        }

        let deadline =
            std::time::Instant::now() + Duration::from_secs(SIGTERM_GRACE_PERIOD_SECONDS);
        let poll_interval = Duration::from_millis(KILL_POLL_INTERVAL_MS);

        while std::time::Instant::now() < deadline {
            match killpg(pgid, None) {
                Err(nix::errno::Errno::ESRCH) => return,
                _ => std::thread::sleep(poll_interval),
            }
        }

        let _ = killpg(pgid, Signal::SIGKILL);
    })
    .await
    .unwrap_or_else(|e| log_warn!("kill_process_group task panicked: {}", e));
}

// --- Remote status (poll-by-target fallback) ---

/// State of the most recent migration into a target repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteMigrationState {
    /// No migration found for that repository (yet).
    NotFound,
    InFlight(String),
    Succeeded,
    Failed(String),
}

#[derive(Deserialize)]
struct StatusResponse {
    data: Option<StatusData>,
    #[serde(default)]
    errors: Vec<StatusError>,
}

#[derive(Deserialize)]
struct StatusData {
    organization: Option<StatusOrganization>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusOrganization {
    repository_migrations: StatusConnection,
}

#[derive(Deserialize)]
struct StatusConnection {
    #[serde(default)]
    nodes: Vec<StatusNode>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusNode {
    state: String,
    #[serde(default)]
    failure_reason: Option<String>,
}

#[derive(Deserialize)]
struct StatusError {
    message: String,
}

/// Parse the GraphQL response of the migration status query.
pub fn parse_migration_state(json: &str) -> Result<RemoteMigrationState, String> {
    let response: StatusResponse = serde_json::from_str(json)
        .map_err(|e| format!("Failed to parse migration status response: {}", e))?;

    if let Some(err) = response.errors.first() {
        return Err(format!("Migration status query failed: {}", err.message));
    }

    let node = response
        .data
        .and_then(|d| d.organization)
        .and_then(|o| o.repository_migrations.nodes.into_iter().last());

    let Some(node) = node else {
        return Ok(RemoteMigrationState::NotFound);
    };

    Ok(match node.state.as_str() {
        "SUCCEEDED" => RemoteMigrationState::Succeeded,
        "FAILED" | "FAILED_VALIDATION" => RemoteMigrationState::Failed(
            node.failure_reason
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| node.state.clone()),
        ),
        other => RemoteMigrationState::InFlight(other.to_string()),
    })
}

// --- CLI adapter ---

/// Real adapter that shells out to the migration CLI (`gh ado2gh ...` by default).
pub struct CliMigrationAdapter {
    tool: ToolConfig,
    extractor: Arc<dyn CorrelationExtractor>,
}

impl CliMigrationAdapter {
    pub fn new(tool: ToolConfig, extractor: Arc<dyn CorrelationExtractor>) -> Self {
        Self { tool, extractor }
    }

    /// Verify that the CLI and its migration extension are available on PATH.
    pub fn verify_cli_available(&self) -> Result<(), String> {
        let output = std::process::Command::new(&self.tool.cli)
            .args([self.tool.extension.as_str(), "--version"])
            .output()
            .map_err(|e| format!("{} not found on PATH ({})", self.tool.cli, e))?;

        if !output.status.success() {
            return Err(format!(
                "{} found but `{} {} --version` failed. Install the extension with `{} extension install github/gh-{}`",
                self.tool.cli, self.tool.cli, self.tool.extension, self.tool.cli, self.tool.extension
            ));
        }

        Ok(())
    }

    pub fn lock_args(&self, source: &SourceRepo) -> Vec<String> {
        vec![
            self.tool.extension.clone(),
            "lock-ado-repo".to_string(),
            "--ado-org".to_string(),
            source.org.clone(),
            "--ado-team-project".to_string(),
            source.project.clone(),
            "--ado-repo".to_string(),
            source.repo.clone(),
        ]
    }

    pub fn migrate_args(&self, source: &SourceRepo, target: &TargetRepo) -> Vec<String> {
        vec![
            self.tool.extension.clone(),
            "migrate-repo".to_string(),
            "--ado-org".to_string(),
            source.org.clone(),
            "--ado-team-project".to_string(),
            source.project.clone(),
            "--ado-repo".to_string(),
            source.repo.clone(),
            "--github-org".to_string(),
            target.org.clone(),
            "--github-repo".to_string(),
            target.repo.clone(),
            "--queue-only".to_string(),
            "--target-repo-visibility".to_string(),
            self.tool.target_repo_visibility.clone(),
        ]
    }

    pub fn wait_args(&self, correlation_id: &CorrelationId) -> Vec<String> {
        vec![
            self.tool.extension.clone(),
            "wait-for-migration".to_string(),
            "--migration-id".to_string(),
            correlation_id.to_string(),
        ]
    }

    pub fn status_query_args(&self, target: &TargetRepo) -> Vec<String> {
        vec![
            "api".to_string(),
            "graphql".to_string(),
            "-f".to_string(),
            format!("query={}", MIGRATION_STATUS_QUERY),
            "-f".to_string(),
            format!("org={}", target.org),
            "-f".to_string(),
            format!("repo={}", target.repo),
        ]
    }

    fn command(&self, args: Vec<String>) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.tool.cli);
        cmd.args(args);
        cmd
    }

    async fn poll_by_target(&self, target: &TargetRepo) -> Result<DateTime<Utc>, AdapterError> {
        let deadline = tokio::time::Instant::now() + self.tool.wait_timeout();
        let interval = self.tool.status_poll_interval();

        loop {
            let cmd = self.command(self.status_query_args(target));
            match run_tool_command(cmd, self.tool.command_timeout()).await {
                Ok(output) if output.success => match parse_migration_state(&output.stdout) {
                    Ok(RemoteMigrationState::Succeeded) => return Ok(Utc::now()),
                    Ok(RemoteMigrationState::Failed(reason)) => {
                        return Err(AdapterError::Remote(format!(
                            "migration into {} failed: {}",
                            target, reason
                        )))
                    }
                    Ok(state) => log_debug!("[{}] Remote state: {:?}", target, state),
                    Err(e) => log_debug!("[{}] Status poll unreadable: {}", target, e),
                },
                Ok(output) => log_debug!(
                    "[{}] Status poll failed: {}",
                    target,
                    output.failure_summary()
                ),
                Err(e) => log_debug!("[{}] Status poll failed: {}", target, e),
            }

            if tokio::time::Instant::now() + interval > deadline {
                return Err(AdapterError::Remote(format!(
                    "timed out after {} minutes waiting for migration into {}",
                    self.tool.wait_timeout_minutes, target
                )));
            }
            tokio::time::sleep(interval).await;
        }
    }
}

impl MigrationAdapter for CliMigrationAdapter {
    async fn lock(&self, source: &SourceRepo) -> Result<(), AdapterError> {
        let cmd = self.command(self.lock_args(source));
        let output = run_tool_command(cmd, self.tool.command_timeout())
            .await
            .map_err(|e| AdapterError::Lock(format!("{}: {}", source, e)))?;

        if !output.success {
            return Err(AdapterError::Lock(format!(
                "{}: {}",
                source,
                output.failure_summary()
            )));
        }
        Ok(())
    }

    async fn submit_migration(
        &self,
        source: &SourceRepo,
        target: &TargetRepo,
    ) -> Result<Option<CorrelationId>, AdapterError> {
        let cmd = self.command(self.migrate_args(source, target));
        let output = run_tool_command(cmd, self.tool.command_timeout())
            .await
            .map_err(|e| AdapterError::Submit(format!("{} -> {}: {}", source, target, e)))?;

        if !output.success {
            return Err(AdapterError::Submit(format!(
                "{} -> {}: {}",
                source,
                target,
                output.failure_summary()
            )));
        }

        let id = self.extractor.extract(&output.combined());
        if id.is_none() {
            log_warn!(
                "[{}] No migration id in tool output; will poll by target repository",
                target
            );
        }
        Ok(id)
    }

    async fn await_completion(
        &self,
        correlation_id: Option<&CorrelationId>,
        target: &TargetRepo,
    ) -> Result<DateTime<Utc>, AdapterError> {
        let Some(id) = correlation_id else {
            return self.poll_by_target(target).await;
        };

        let cmd = self.command(self.wait_args(id));
        let output = run_tool_command(cmd, self.tool.wait_timeout())
            .await
            .map_err(|e| AdapterError::Remote(format!("migration {}: {}", id, e)))?;

        if !output.success {
            return Err(AdapterError::Remote(format!(
                "migration {}: {}",
                id,
                output.failure_summary()
            )));
        }
        Ok(Utc::now())
    }
}

// --- Mock adapter ---

/// How the mock answers a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockSubmit {
    /// Acknowledged with id `RM_<source repo>`.
    DerivedId,
    /// Acknowledged with this id.
    Id(String),
    /// Acknowledged, but the output carried no id.
    NoId,
    Fails(String),
}

/// Scripted behavior for one source repository in `MockMigrationAdapter`.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    pub lock: Result<(), String>,
    /// Time spent in `lock` before it answers.
    pub lock_delay: Duration,
    pub submit: MockSubmit,
    /// Time spent in `await_completion`.
    pub delay: Duration,
    pub remote: Result<(), String>,
}

impl MockBehavior {
    pub fn succeed_after(delay: Duration) -> Self {
        Self {
            lock: Ok(()),
            lock_delay: Duration::ZERO,
            submit: MockSubmit::DerivedId,
            delay,
            remote: Ok(()),
        }
    }

    pub fn lock_fails(message: &str) -> Self {
        Self {
            lock: Err(message.to_string()),
            ..Self::succeed_after(Duration::ZERO)
        }
    }

    pub fn submit_fails(message: &str) -> Self {
        Self {
            submit: MockSubmit::Fails(message.to_string()),
            ..Self::succeed_after(Duration::ZERO)
        }
    }

    pub fn remote_fails_after(delay: Duration, message: &str) -> Self {
        Self {
            remote: Err(message.to_string()),
            ..Self::succeed_after(delay)
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.submit = MockSubmit::Id(id.to_string());
        self
    }

    pub fn without_id(mut self) -> Self {
        self.submit = MockSubmit::NoId;
        self
    }

    pub fn with_lock_delay(mut self, delay: Duration) -> Self {
        self.lock_delay = delay;
        self
    }
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self::succeed_after(Duration::ZERO)
    }
}

/// What the mock saw, in order. Payloads are source repository names
/// except `AwaitedById`, which carries the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Locked(String),
    Submitted(String),
    AwaitedById(String),
    AwaitedByTarget(String),
    Finished(String),
}

/// Mock adapter for scheduler tests.
///
/// Behaviors are keyed by source repository name; unlisted repositories use
/// `MockBehavior::default()`. An item counts as in flight from the start of
/// its submission until its wait returns.
pub struct MockMigrationAdapter {
    behaviors: HashMap<String, MockBehavior>,
    /// Target display name -> source repo, filled at submission.
    submitted: std::sync::Mutex<HashMap<String, String>>,
    events: std::sync::Mutex<Vec<MockEvent>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockMigrationAdapter {
    pub fn new() -> Self {
        Self {
            behaviors: HashMap::new(),
            submitted: std::sync::Mutex::new(HashMap::new()),
            events: std::sync::Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with(mut self, repo: &str, behavior: MockBehavior) -> Self {
        self.behaviors.insert(repo.to_string(), behavior);
        self
    }

    fn behavior(&self, repo: &str) -> MockBehavior {
        self.behaviors.get(repo).cloned().unwrap_or_default()
    }

    fn push(&self, event: MockEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Source repositories in the order their locks were started.
    pub fn lock_order(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                MockEvent::Locked(repo) => Some(repo),
                _ => None,
            })
            .collect()
    }

    /// Source repositories in the order their submissions started.
    pub fn submission_order(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                MockEvent::Submitted(repo) => Some(repo),
                _ => None,
            })
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn source_for(&self, target: &TargetRepo) -> String {
        self.submitted
            .lock()
            .ok()
            .and_then(|m| m.get(&target.to_string()).cloned())
            .unwrap_or_else(|| target.repo.clone())
    }
}

impl Default for MockMigrationAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationAdapter for MockMigrationAdapter {
    async fn lock(&self, source: &SourceRepo) -> Result<(), AdapterError> {
        self.push(MockEvent::Locked(source.repo.clone()));
        let behavior = self.behavior(&source.repo);
        if !behavior.lock_delay.is_zero() {
            tokio::time::sleep(behavior.lock_delay).await;
        }
        behavior.lock.map_err(AdapterError::Lock)
    }

    async fn submit_migration(
        &self,
        source: &SourceRepo,
        target: &TargetRepo,
    ) -> Result<Option<CorrelationId>, AdapterError> {
        self.enter();
        self.push(MockEvent::Submitted(source.repo.clone()));

        let id = match self.behavior(&source.repo).submit {
            MockSubmit::DerivedId => Some(CorrelationId::new(format!("RM_{}", source.repo))),
            MockSubmit::Id(id) => Some(CorrelationId::new(id)),
            MockSubmit::NoId => None,
            MockSubmit::Fails(message) => {
                self.leave();
                return Err(AdapterError::Submit(message));
            }
        };

        if let Ok(mut submitted) = self.submitted.lock() {
            submitted.insert(target.to_string(), source.repo.clone());
        }
        Ok(id)
    }

    async fn await_completion(
        &self,
        correlation_id: Option<&CorrelationId>,
        target: &TargetRepo,
    ) -> Result<DateTime<Utc>, AdapterError> {
        let repo = self.source_for(target);
        let behavior = self.behavior(&repo);
        match correlation_id {
            Some(id) => self.push(MockEvent::AwaitedById(id.to_string())),
            None => self.push(MockEvent::AwaitedByTarget(repo.clone())),
        }

        tokio::time::sleep(behavior.delay).await;

        self.push(MockEvent::Finished(repo));
        self.leave();
        behavior
            .remote
            .map(|_| Utc::now())
            .map_err(AdapterError::Remote)
    }
}
