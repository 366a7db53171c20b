use std::fs;
use std::path::{Path, PathBuf};

use crate::log_warn;

pub const LOCK_FILE_NAME: &str = "migrate-golem.lock";
pub const PID_FILE_NAME: &str = "migrate-golem.pid";

/// Holds the run lock for a project root until dropped.
#[must_use = "lock is released when RunLock is dropped"]
pub struct RunLock {
    lock: fslock::LockFile,
    pid_path: PathBuf,
}

impl std::fmt::Debug for RunLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLock")
            .field("pid_path", &self.pid_path)
            .finish()
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = self.lock.unlock() {
            log_warn!("Warning: Failed to release run lock: {}", e);
        }
        if let Err(e) = fs::remove_file(&self.pid_path) {
            log_warn!(
                "Warning: Failed to remove PID file {}: {}",
                self.pid_path.display(),
                e
            );
        }
    }
}

/// Take the per-project run lock in `runtime_dir` (normally `.migrate-golem/`).
///
/// Two schedulers sharing one inventory would lock and submit the same
/// repositories twice, so only one run per project root may hold it.
/// The PID file is written only after the lock is held and is used to explain contention.
pub fn try_acquire(runtime_dir: &Path) -> Result<RunLock, String> {
    fs::create_dir_all(runtime_dir)
        .map_err(|e| format!("Failed to create {}: {}", runtime_dir.display(), e))?;

    let lock_path = runtime_dir.join(LOCK_FILE_NAME);
    let pid_path = runtime_dir.join(PID_FILE_NAME);

    let mut lock = fslock::LockFile::open(&lock_path)
        .map_err(|e| format!("Failed to open lock file {}: {}", lock_path.display(), e))?;

    let acquired = lock
        .try_lock()
        .map_err(|e| format!("Failed to acquire run lock: {}", e))?;

    if !acquired {
        return Err(contention_message(&lock_path, &pid_path));
    }

    fs::write(&pid_path, std::process::id().to_string())
        .map_err(|e| format!("Failed to write PID file: {}", e))?;

    Ok(RunLock { lock, pid_path })
}

fn contention_message(lock_path: &Path, pid_path: &Path) -> String {
    let holder = fs::read_to_string(pid_path)
        .ok()
        .and_then(|s| s.trim().parse::<i32>().ok());

    match holder {
        Some(pid) if is_pid_alive(pid) => format!(
            "Another migrate-golem run is in progress (PID {})",
            pid
        ),
        // flock is released on process death, so a dead holder means something odd
        Some(pid) => format!(
            "Run lock is held but recorded PID {} is not alive. \
             Remove {} and {} to recover",
            pid,
            lock_path.display(),
            pid_path.display()
        ),
        None => format!(
            "Another migrate-golem run holds the lock. \
             If this is stale, remove {}",
            lock_path.display()
        ),
    }
}

fn is_pid_alive(pid: i32) -> bool {
    // signal 0 checks if process exists without sending a signal
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}
