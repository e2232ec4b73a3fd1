//! Whole-output-tree advisory lock (`<root>/.ggen.lock`)
//!
//! The lock file is created with `create_new` and holds the owner's PID and
//! acquisition time as JSON. A lock whose owner is no longer running is
//! reclaimed; a live one is polled until the timeout expires.
//!
//! Reclaiming renames the stale file aside before deleting it, so a waiter
//! that lost the race to another reclaimer cannot delete the new owner's
//! lock. Release likewise only removes the file while it still names us.

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessesToUpdate, System};

pub const LOCK_FILE: &str = ".ggen.lock";
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

/// Held for the duration of a run; the lock file is removed on drop
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    owner: LockOwner,
}

#[derive(Debug)]
enum LockState {
    HeldBy(u32),
    Stale(LockOwner),
    Unknown,
}

impl RunLock {
    /// Acquire the lock for `output_root`, waiting up to `timeout`
    pub fn acquire(output_root: &Path, timeout: Duration) -> SyncResult<Self> {
        fs::create_dir_all(output_root).map_err(|e| SyncError::io(output_root, e))?;
        let lock_path = output_root.join(LOCK_FILE);
        let started = Instant::now();
        let mut last_owner = None;

        loop {
            match try_acquire(&lock_path) {
                Ok(Some(lock)) => {
                    tracing::debug!(lock = %lock_path.display(), "run lock acquired");
                    return Ok(lock);
                }
                Ok(None) => {}
                Err(e) => return Err(SyncError::io(&lock_path, e)),
            }

            match inspect(&lock_path) {
                LockState::Stale(owner) => {
                    tracing::warn!(lock = %lock_path.display(), pid = owner.pid, "reclaiming stale run lock");
                    reclaim_stale(&lock_path, &owner);
                    continue;
                }
                LockState::HeldBy(pid) => last_owner = Some(pid),
                LockState::Unknown => {}
            }

            if started.elapsed() >= timeout {
                return Err(SyncError::LockTimeout {
                    lock_file: lock_path,
                    timeout_secs: timeout.as_secs(),
                    owner_pid: last_owner,
                });
            }
            thread::sleep(LOCK_RETRY_DELAY);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn owner(&self) -> &LockOwner {
        &self.owner
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if read_owner(&self.path).as_ref() != Some(&self.owner) {
            tracing::warn!(lock = %self.path.display(), "run lock no longer ours; leaving it in place");
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(lock = %self.path.display(), error = %e, "failed to release run lock");
            }
        }
    }
}

/// `Ok(None)` when someone else holds the file
fn try_acquire(lock_path: &Path) -> io::Result<Option<RunLock>> {
    match OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(lock_path)
    {
        Ok(mut file) => {
            let owner = LockOwner {
                pid: std::process::id(),
                acquired_at: Utc::now(),
            };
            let json = serde_json::to_string(&owner).map_err(io::Error::other)?;
            file.write_all(json.as_bytes())?;
            Ok(Some(RunLock {
                path: lock_path.to_path_buf(),
                owner,
            }))
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(e),
    }
}

fn inspect(lock_path: &Path) -> LockState {
    let Ok(content) = fs::read_to_string(lock_path) else {
        return LockState::Unknown;
    };
    match serde_json::from_str::<LockOwner>(&content) {
        Ok(owner) if is_process_running(owner.pid) => LockState::HeldBy(owner.pid),
        Ok(owner) => LockState::Stale(owner),
        // the owner may not have written its record yet
        Err(_) => LockState::Unknown,
    }
}

/// Move a stale lock aside and delete it, unless the file that was moved
/// turns out to belong to someone other than `stale`.
fn reclaim_stale(lock_path: &Path, stale: &LockOwner) {
    let aside = lock_path.with_file_name(format!("{LOCK_FILE}.stale-{}", stale.pid));
    if let Err(e) = fs::rename(lock_path, &aside) {
        // another waiter got there first
        tracing::debug!(lock = %lock_path.display(), error = %e, "stale lock already moved");
        return;
    }
    if read_owner(&aside).as_ref() != Some(stale) {
        // a new owner replaced the file between inspection and rename
        if let Err(e) = fs::hard_link(&aside, lock_path) {
            tracing::warn!(lock = %lock_path.display(), error = %e, "failed to restore live run lock");
        }
    }
    if let Err(e) = fs::remove_file(&aside) {
        tracing::warn!(path = %aside.display(), error = %e, "failed to remove stale run lock");
    }
}

fn read_owner(lock_path: &Path) -> Option<LockOwner> {
    let content = fs::read_to_string(lock_path).ok()?;
    serde_json::from_str(&content).ok()
}

/// Read the current owner of a lock file, if any
pub fn lock_owner(output_root: &Path) -> Option<LockOwner> {
    read_owner(&output_root.join(LOCK_FILE))
}

fn is_process_running(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}
