//! Failure recording and remediation guidance
//!
//! This module provides:
//! - Attempt records under `<root>/.ggen-recovery` for post-mortem diagnosis
//! - Classification of a terminal [`SyncError`] into a remediation category
//! - Ordered, numbered recovery steps for the operator
//! - Best-effort cleanup of the staging directory
//! - The whole-output-tree run lock ([`lock`])

pub mod lock;

pub use lock::{DEFAULT_LOCK_TIMEOUT, LOCK_FILE, LockOwner, RunLock, lock_owner};

use crate::codegen::STAGING_DIR;
use crate::error::{ErrorKind, SyncError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const RECOVERY_DIR: &str = ".ggen-recovery";
const CURRENT_ATTEMPT_FILE: &str = "current-attempt.json";
const RECORD_TS_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";

// =============================================================================
// ATTEMPT RECORDS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Success,
    Failed,
}

/// One sync run, as persisted for later diagnosis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncAttempt {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub status: AttemptStatus,
    pub transformations: Vec<String>,
    pub output_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default)]
    pub recovery_steps: Vec<String>,
}

/// Remediation family a failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum RecoveryCategory {
    Permission,
    DiskSpace,
    Timeout,
    Manifest,
    Generic,
}

impl From<ErrorKind> for RecoveryCategory {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::OutputPermissionDenied => RecoveryCategory::Permission,
            ErrorKind::OutputDiskFull => RecoveryCategory::DiskSpace,
            ErrorKind::LockTimeout | ErrorKind::GenerationTimeout => RecoveryCategory::Timeout,
            ErrorKind::ManifestNotFound
            | ErrorKind::ManifestInvalid
            | ErrorKind::InputNotFound
            | ErrorKind::PathTraversal
            | ErrorKind::PreflightFailed => RecoveryCategory::Manifest,
            ErrorKind::SchemaInvalid
            | ErrorKind::ValidationFailed
            | ErrorKind::GenerationFailed
            | ErrorKind::CommitFailed
            | ErrorKind::InvalidTransition
            | ErrorKind::Cancelled
            | ErrorKind::Io => RecoveryCategory::Generic,
        }
    }
}

/// Ordered, numbered recovery steps for `category`.
///
/// The list always ends with the manual staging cleanup instruction.
pub fn recovery_steps(category: RecoveryCategory, output_root: &Path) -> Vec<String> {
    let out = output_root.display();
    let mut steps: Vec<String> = match category {
        RecoveryCategory::Permission => vec![
            format!("Check output directory permissions: chmod 755 {out}"),
            format!("Verify user ownership: chown $USER {out}"),
            "Retry sync operation".to_string(),
        ],
        RecoveryCategory::DiskSpace => vec![
            format!("Check available disk space: df -h {out}"),
            "Clean up old files or expand disk".to_string(),
            "Retry sync operation".to_string(),
        ],
        RecoveryCategory::Timeout => vec![
            "Review query and template complexity of the slow transformation".to_string(),
            "Break the transformation into smaller parts if possible".to_string(),
            "Increase the transformation timeout in ggen.toml".to_string(),
            format!("If another sync holds {out}/{LOCK_FILE}, wait for it to finish"),
            "Retry sync operation".to_string(),
        ],
        RecoveryCategory::Manifest => vec![
            "Check ggen.toml syntax".to_string(),
            "Verify all referenced files exist".to_string(),
            "Review manifest for errors".to_string(),
            "Retry sync operation".to_string(),
        ],
        RecoveryCategory::Generic => vec![
            "Review error message above".to_string(),
            "Check ggen.toml configuration".to_string(),
            "Verify all input files exist and are readable".to_string(),
            "Check output directory permissions".to_string(),
            format!("Review debug logs in {out}/{RECOVERY_DIR}"),
            "Retry sync operation".to_string(),
        ],
    };
    steps.push(format!(
        "Manual cleanup if needed: rm -rf {out}/{STAGING_DIR}"
    ));
    steps
        .into_iter()
        .enumerate()
        .map(|(i, step)| format!("{}. {step}", i + 1))
        .collect()
}

// =============================================================================
// RECOVERY MANAGER
// =============================================================================

/// Records sync attempts and turns failures into recovery guidance.
///
/// Record persistence is best-effort: a failure to write a record is logged
/// and never masks the error being handled.
#[derive(Debug)]
pub struct RecoveryManager {
    output_root: PathBuf,
    recovery_dir: PathBuf,
    current: Option<SyncAttempt>,
}

impl RecoveryManager {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        let output_root = output_root.into();
        let recovery_dir = output_root.join(RECOVERY_DIR);
        Self {
            output_root,
            recovery_dir,
            current: None,
        }
    }

    pub fn recovery_dir(&self) -> &Path {
        &self.recovery_dir
    }

    pub fn current_attempt(&self) -> Option<&SyncAttempt> {
        self.current.as_ref()
    }

    /// Start a new attempt and persist it as `current-attempt.json`
    pub fn record_attempt<S: AsRef<str>>(&mut self, transformations: &[S]) -> &SyncAttempt {
        let attempt = self.new_attempt(transformations);
        debug!(attempt = %attempt.id, transformations = attempt.transformations.len(), "recording sync attempt");
        self.persist(CURRENT_ATTEMPT_FILE, &attempt);
        self.current.insert(attempt)
    }

    /// Archive the current attempt as `success-<ts>.json`
    pub fn record_success(&mut self) {
        let Some(attempt) = self.current.as_mut() else {
            warn!("record_success called without a recorded attempt");
            return;
        };
        attempt.status = AttemptStatus::Success;
        let attempt = attempt.clone();

        let name = format!("success-{}.json", attempt.timestamp.format(RECORD_TS_FORMAT));
        self.persist(&name, &attempt);
        remove_quietly(&self.recovery_dir.join(CURRENT_ATTEMPT_FILE));
        info!(attempt = %attempt.id, "sync attempt recorded as successful");
    }

    /// Classify `err`, persist the failed attempt and return recovery steps.
    ///
    /// A [`SyncError::LockTimeout`] means another run owns the tree, so only
    /// `failed-<ts>.json` is written and that run's `current-attempt.json`
    /// is left alone.
    pub fn handle_failure(&mut self, err: &SyncError) -> Vec<String> {
        let kind = err.kind();
        let category = RecoveryCategory::from(kind);
        let steps = recovery_steps(category, &self.output_root);
        let owns_tree = kind != ErrorKind::LockTimeout;

        let mut attempt = match self.current.take() {
            Some(attempt) => attempt,
            None => self.new_attempt::<&str>(&[]),
        };
        attempt.status = AttemptStatus::Failed;
        attempt.error = Some(err.to_string());
        attempt.error_kind = Some(kind);
        attempt.recovery_steps = steps.clone();

        error!(
            attempt = %attempt.id,
            error_kind = %kind,
            category = kind.category(),
            recovery = %category,
            error = %err,
            "sync failed"
        );

        let name = format!("failed-{}.json", Utc::now().format(RECORD_TS_FORMAT));
        self.persist(&name, &attempt);
        if owns_tree {
            self.persist(CURRENT_ATTEMPT_FILE, &attempt);
        }
        self.current = Some(attempt);
        steps
    }

    /// Remove the staging directory.
    ///
    /// The run lock is not touched here; it belongs to the [`RunLock`] guard,
    /// which releases it on drop.
    pub fn cleanup(&self) {
        let staging = self.output_root.join(STAGING_DIR);
        match fs::remove_dir_all(&staging) {
            Ok(()) => debug!(path = %staging.display(), "removed staging directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %staging.display(), error = %e, "failed to remove staging directory"),
        }
    }

    /// Read back the last persisted in-progress or failed attempt
    pub fn load_current(output_root: &Path) -> Option<SyncAttempt> {
        let path = output_root.join(RECOVERY_DIR).join(CURRENT_ATTEMPT_FILE);
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn new_attempt<S: AsRef<str>>(&self, transformations: &[S]) -> SyncAttempt {
        SyncAttempt {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            status: AttemptStatus::InProgress,
            transformations: transformations
                .iter()
                .map(|s| s.as_ref().to_string())
                .collect(),
            output_dir: self.output_root.display().to_string(),
            error: None,
            error_kind: None,
            recovery_steps: Vec::new(),
        }
    }

    fn persist(&self, file_name: &str, attempt: &SyncAttempt) {
        let path = self.recovery_dir.join(file_name);
        let result = fs::create_dir_all(&self.recovery_dir).and_then(|()| {
            let json = serde_json::to_string_pretty(attempt).map_err(io::Error::other)?;
            fs::write(&path, json)
        });
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "failed to persist recovery record");
        }
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(dir: &Path, prefix: &str) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(dir.join(RECOVERY_DIR)) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(prefix))
            })
            .collect()
    }

    #[test]
    fn attempt_then_success_archives_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = RecoveryManager::new(dir.path());

        manager.record_attempt(&["docs", "api"]);
        let current = RecoveryManager::load_current(dir.path()).unwrap();
        assert_eq!(current.status, AttemptStatus::InProgress);
        assert_eq!(current.transformations, vec!["docs", "api"]);

        manager.record_success();
        assert!(RecoveryManager::load_current(dir.path()).is_none());
        assert_eq!(records(dir.path(), "success-").len(), 1);
    }

    #[test]
    fn permission_failure_gets_permission_steps() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = RecoveryManager::new(dir.path());
        manager.record_attempt(&["docs"]);

        let err = SyncError::io(
            dir.path().join("out.md"),
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        let steps = manager.handle_failure(&err);

        assert!(steps[0].starts_with("1. Check output directory permissions"));
        assert!(steps.last().unwrap().contains(STAGING_DIR));
        assert!(steps.last().unwrap().starts_with(&format!("{}.", steps.len())));

        let current = RecoveryManager::load_current(dir.path()).unwrap();
        assert_eq!(current.status, AttemptStatus::Failed);
        assert_eq!(current.error_kind, Some(ErrorKind::OutputPermissionDenied));
        assert_eq!(current.recovery_steps, steps);
        assert_eq!(records(dir.path(), "failed-").len(), 1);
    }

    #[test]
    fn failure_without_attempt_still_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = RecoveryManager::new(dir.path());
        let steps = manager.handle_failure(&SyncError::ManifestNotFound {
            path: PathBuf::from("ggen.toml"),
        });
        assert!(steps[0].contains("ggen.toml syntax"));
        assert_eq!(records(dir.path(), "failed-").len(), 1);
    }

    #[test]
    fn categories_cover_timeouts_and_disk() {
        assert_eq!(
            RecoveryCategory::from(ErrorKind::LockTimeout),
            RecoveryCategory::Timeout
        );
        assert_eq!(
            RecoveryCategory::from(ErrorKind::OutputDiskFull),
            RecoveryCategory::DiskSpace
        );
        assert_eq!(
            RecoveryCategory::from(ErrorKind::ValidationFailed),
            RecoveryCategory::Generic
        );
        let steps = recovery_steps(RecoveryCategory::DiskSpace, Path::new("out"));
        assert_eq!(steps[0], "1. Check available disk space: df -h out");
    }

    #[test]
    fn lock_timeout_leaves_current_attempt_alone() {
        let dir = tempfile::tempdir().unwrap();
        let mut owner = RecoveryManager::new(dir.path());
        owner.record_attempt(&["docs"]);
        let before = fs::read(dir.path().join(RECOVERY_DIR).join(CURRENT_ATTEMPT_FILE)).unwrap();

        let mut waiter = RecoveryManager::new(dir.path());
        let steps = waiter.handle_failure(&SyncError::LockTimeout {
            lock_file: dir.path().join(LOCK_FILE),
            timeout_secs: 1,
            owner_pid: Some(1),
        });

        assert!(steps.iter().any(|s| s.contains(LOCK_FILE)));
        assert_eq!(records(dir.path(), "failed-").len(), 1);
        let after = fs::read(dir.path().join(RECOVERY_DIR).join(CURRENT_ATTEMPT_FILE)).unwrap();
        assert_eq!(before, after);
        assert_eq!(waiter.current_attempt().unwrap().status, AttemptStatus::Failed);
    }

    #[test]
    fn cleanup_removes_staging_but_not_lock() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(STAGING_DIR).join("nested")).unwrap();
        fs::write(dir.path().join(LOCK_FILE), "{}").unwrap();

        let manager = RecoveryManager::new(dir.path());
        manager.cleanup();
        assert!(!dir.path().join(STAGING_DIR).exists());
        assert!(dir.path().join(LOCK_FILE).exists());

        // second cleanup on an already-clean tree is a no-op
        manager.cleanup();
    }
}
