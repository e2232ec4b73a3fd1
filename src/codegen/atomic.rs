//! All-or-nothing promotion of generated files
//!
//! Files are staged under `<output_root>/.ggen-staging` and only become
//! visible on [`AtomicWriter::commit`], one rename per file. Before the first
//! rename a commit journal listing every staged file is written into the
//! staging directory, so a crash mid-commit can be rolled forward by
//! [`AtomicWriter::recover_interrupted`] on the next run.
//!
//! **Valid transitions**:
//! - Fresh -> InProgress (first `write()`)
//! - InProgress -> Committed | Failed (via `commit()`)
//! - Fresh | InProgress -> RolledBack (via `rollback()`)
//!
//! Terminal states accept no further operations.

use crate::error::{SyncError, SyncResult};
use crate::validation::validate_path_safe;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::{Deref, DerefMut};
use std::path::{Component, Path, PathBuf};

pub const STAGING_DIR: &str = ".ggen-staging";
const JOURNAL_FILE: &str = ".commit-journal.json";

// ============================================================================
// Transaction manifest
// ============================================================================

/// Lifecycle of one writer
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TxStatus {
    Fresh,
    InProgress,
    Committed,
    RolledBack,
    Failed,
}

impl TxStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TxStatus::Committed | TxStatus::RolledBack | TxStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Staged,
    Committed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedFile {
    pub size: u64,
    pub timestamp: DateTime<Utc>,
    pub status: FileStatus,
}

/// Bookkeeping for one transaction; never outlives its writer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionManifest {
    pub timestamp: DateTime<Utc>,
    pub status: TxStatus,
    /// Relative output path → staging record, in write order
    pub files: IndexMap<String, StagedFile>,
}

/// On-disk record of a commit in flight
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommitJournal {
    started: DateTime<Utc>,
    files: Vec<String>,
}

/// What [`AtomicWriter::recover_interrupted`] found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterruptedCommit {
    /// No staging directory present
    Clean,
    /// Staging directory without journal; its files were discarded
    Discarded,
    /// Journal found; the listed files were promoted
    RolledForward { files: Vec<String> },
}

// ============================================================================
// Writer
// ============================================================================

#[derive(Debug)]
pub struct AtomicWriter {
    output_root: PathBuf,
    staging_dir: PathBuf,
    manifest: TransactionManifest,
}

impl AtomicWriter {
    /// Start a transaction against `output_root`.
    ///
    /// Any leftover staging directory is resolved first via
    /// [`AtomicWriter::recover_interrupted`].
    pub fn begin(output_root: impl Into<PathBuf>) -> SyncResult<Self> {
        let output_root = output_root.into();
        let recovered = Self::recover_interrupted(&output_root)?;
        if recovered != InterruptedCommit::Clean {
            tracing::warn!(
                output_root = %output_root.display(),
                outcome = ?recovered,
                "resolved leftover staging directory"
            );
        }

        let staging_dir = output_root.join(STAGING_DIR);
        fs::create_dir_all(&staging_dir).map_err(|e| SyncError::io(&staging_dir, e))?;

        tracing::debug!(staging = %staging_dir.display(), "transaction started");

        Ok(Self {
            output_root,
            staging_dir,
            manifest: TransactionManifest {
                timestamp: Utc::now(),
                status: TxStatus::Fresh,
                files: IndexMap::new(),
            },
        })
    }

    pub fn status(&self) -> TxStatus {
        self.manifest.status
    }

    pub fn manifest(&self) -> &TransactionManifest {
        &self.manifest
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    pub fn staged_files(&self) -> impl Iterator<Item = &str> {
        self.manifest.files.keys().map(String::as_str)
    }

    /// Stage `content` for `relative_path`.
    ///
    /// # Errors
    /// - [`SyncError::InvalidPath`] for absolute, traversing or reserved paths;
    ///   nothing is staged
    /// - [`SyncError::InvalidTransition`] once the transaction is terminal
    pub fn write(&mut self, relative_path: &str, content: impl AsRef<[u8]>) -> SyncResult<()> {
        self.require_open("write")?;

        if validate_path_safe(relative_path).is_err() || is_reserved(relative_path) {
            return Err(SyncError::InvalidPath {
                path: relative_path.to_string(),
            });
        }

        let key = normalize_key(relative_path);
        let staged = self.staging_dir.join(&key);
        if let Some(parent) = staged.parent() {
            fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
        }

        let content = content.as_ref();
        fs::write(&staged, content).map_err(|e| SyncError::io(&staged, e))?;

        self.manifest.files.insert(
            key,
            StagedFile {
                size: content.len() as u64,
                timestamp: Utc::now(),
                status: FileStatus::Staged,
            },
        );
        self.manifest.status = TxStatus::InProgress;

        tracing::trace!(path = relative_path, bytes = content.len(), "staged");
        Ok(())
    }

    /// Promote every staged file into the output tree.
    ///
    /// On the first failed rename the transaction becomes `Failed` and the
    /// journal is left in place for roll-forward.
    pub fn commit(&mut self) -> SyncResult<&TransactionManifest> {
        if self.manifest.status != TxStatus::InProgress {
            return Err(SyncError::InvalidTransition {
                operation: "commit",
                state: self.manifest.status.to_string(),
            });
        }

        let journal = CommitJournal {
            started: Utc::now(),
            files: self.manifest.files.keys().cloned().collect(),
        };
        if let Err(e) = write_journal(&self.staging_dir, &journal) {
            self.manifest.status = TxStatus::Failed;
            return Err(e);
        }

        for (key, record) in self.manifest.files.iter_mut() {
            let source = self.staging_dir.join(key);
            let target = self.output_root.join(key);
            if let Err(e) = promote(&source, &target) {
                self.manifest.status = TxStatus::Failed;
                tracing::error!(
                    path = %target.display(),
                    error = %e,
                    "commit failed, journal kept for roll-forward"
                );
                return Err(SyncError::CommitFailed {
                    path: target,
                    source: e,
                });
            }
            record.status = FileStatus::Committed;
        }

        self.manifest.status = TxStatus::Committed;
        remove_staging(&self.staging_dir);

        tracing::info!(
            files = self.manifest.files.len(),
            output_root = %self.output_root.display(),
            "transaction committed"
        );
        Ok(&self.manifest)
    }

    /// Discard everything staged; the output tree is left untouched
    pub fn rollback(&mut self) -> SyncResult<()> {
        self.require_open("rollback")?;

        if self.staging_dir.exists() {
            fs::remove_dir_all(&self.staging_dir)
                .map_err(|e| SyncError::io(&self.staging_dir, e))?;
        }
        self.manifest.status = TxStatus::RolledBack;

        tracing::info!(
            discarded = self.manifest.files.len(),
            output_root = %self.output_root.display(),
            "transaction rolled back"
        );
        Ok(())
    }

    /// Finish or discard a staging directory left behind by an earlier run.
    ///
    /// With a journal present the commit was already underway, so remaining
    /// staged files are promoted. Without one nothing was promoted and the
    /// staging directory is deleted.
    pub fn recover_interrupted(output_root: &Path) -> SyncResult<InterruptedCommit> {
        let staging_dir = output_root.join(STAGING_DIR);
        if !staging_dir.exists() {
            return Ok(InterruptedCommit::Clean);
        }

        let journal_path = staging_dir.join(JOURNAL_FILE);
        if !journal_path.exists() {
            fs::remove_dir_all(&staging_dir).map_err(|e| SyncError::io(&staging_dir, e))?;
            return Ok(InterruptedCommit::Discarded);
        }

        let content =
            fs::read_to_string(&journal_path).map_err(|e| SyncError::io(&journal_path, e))?;
        let journal: CommitJournal = serde_json::from_str(&content)
            .map_err(|e| SyncError::io(&journal_path, std::io::Error::other(e)))?;

        let mut promoted = Vec::new();
        for key in journal.files {
            let source = staging_dir.join(&key);
            // already renamed before the interruption
            if !source.exists() {
                continue;
            }
            let target = output_root.join(&key);
            promote(&source, &target).map_err(|e| SyncError::CommitFailed {
                path: target.clone(),
                source: e,
            })?;
            promoted.push(key);
        }

        remove_staging(&staging_dir);
        tracing::warn!(
            files = promoted.len(),
            started = %journal.started,
            "rolled forward interrupted commit"
        );
        Ok(InterruptedCommit::RolledForward { files: promoted })
    }

    fn require_open(&self, operation: &'static str) -> SyncResult<()> {
        if self.manifest.status.is_terminal() {
            return Err(SyncError::InvalidTransition {
                operation,
                state: self.manifest.status.to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Scoped usage
// ============================================================================

/// Rolls the wrapped writer back on drop unless it was committed
#[derive(Debug)]
pub struct TransactionGuard {
    writer: AtomicWriter,
}

impl TransactionGuard {
    pub fn begin(output_root: impl Into<PathBuf>) -> SyncResult<Self> {
        Ok(Self {
            writer: AtomicWriter::begin(output_root)?,
        })
    }

    pub fn new(writer: AtomicWriter) -> Self {
        Self { writer }
    }

    pub fn commit(mut self) -> SyncResult<TransactionManifest> {
        self.writer.commit().cloned()
    }

    pub fn rollback(mut self) -> SyncResult<()> {
        self.writer.rollback()
    }
}

impl Deref for TransactionGuard {
    type Target = AtomicWriter;

    fn deref(&self) -> &Self::Target {
        &self.writer
    }
}

impl DerefMut for TransactionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.writer
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        if self.writer.status().is_terminal() {
            return;
        }
        if let Err(e) = self.writer.rollback() {
            tracing::error!(error = %e, "automatic rollback failed");
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn normalize_key(relative_path: &str) -> String {
    Path::new(relative_path)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Paths under `.ggen-*` directories belong to the pipeline itself
fn is_reserved(relative_path: &str) -> bool {
    Path::new(relative_path).components().any(|c| match c {
        Component::Normal(part) => part.to_string_lossy().starts_with(".ggen"),
        _ => false,
    }) || normalize_key(relative_path).is_empty()
}

fn promote(source: &Path, target: &Path) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(source, target)
}

fn write_journal(staging_dir: &Path, journal: &CommitJournal) -> SyncResult<()> {
    let path = staging_dir.join(JOURNAL_FILE);
    let temp = staging_dir.join(format!("{JOURNAL_FILE}.tmp"));
    let json = serde_json::to_vec(journal)
        .map_err(|e| SyncError::io(&path, std::io::Error::other(e)))?;
    fs::write(&temp, json).map_err(|e| SyncError::io(&temp, e))?;
    fs::rename(&temp, &path).map_err(|e| SyncError::io(&path, e))
}

fn remove_staging(staging_dir: &Path) {
    if let Err(e) = fs::remove_dir_all(staging_dir) {
        tracing::warn!(
            path = %staging_dir.display(),
            error = %e,
            "failed to remove staging directory"
        );
    }
}
