//! Error taxonomy for the sync pipeline
//!
//! This module provides:
//! - A typed [`SyncError`] covering every way a run can terminate
//! - An explicit [`ErrorKind`] tag carried by each error, so recovery never
//!   has to inspect message text
//! - Stable category strings for log fields
//! - An error catalogue (title + suggestions) for operator-facing output

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result alias used throughout the pipeline
pub type SyncResult<T> = Result<T, SyncError>;

// =============================================================================
// ERROR KINDS
// =============================================================================

/// Taxonomy tag for a [`SyncError`]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::AsRefStr,
    strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    ManifestNotFound,
    ManifestInvalid,
    InputNotFound,
    SchemaInvalid,
    OutputPermissionDenied,
    OutputDiskFull,
    PathTraversal,
    LockTimeout,
    ValidationFailed,
    GenerationFailed,
    GenerationTimeout,
    CommitFailed,
    PreflightFailed,
    InvalidTransition,
    Cancelled,
    Io,
}

impl ErrorKind {
    /// Get the error category for structured log fields
    pub fn category(&self) -> &'static str {
        match self {
            ErrorKind::ManifestNotFound | ErrorKind::ManifestInvalid => "manifest_error",
            ErrorKind::InputNotFound | ErrorKind::SchemaInvalid | ErrorKind::PreflightFailed => {
                "input_error"
            }
            ErrorKind::OutputPermissionDenied | ErrorKind::OutputDiskFull | ErrorKind::Io => {
                "io_error"
            }
            ErrorKind::PathTraversal => "security_error",
            ErrorKind::LockTimeout | ErrorKind::GenerationTimeout => "timeout",
            ErrorKind::ValidationFailed => "validation_error",
            ErrorKind::GenerationFailed => "subsystem_error",
            ErrorKind::CommitFailed | ErrorKind::InvalidTransition => "transaction_error",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    /// Short human-readable title
    pub fn title(&self) -> &'static str {
        match self {
            ErrorKind::ManifestNotFound => "Manifest File Not Found",
            ErrorKind::ManifestInvalid => "Invalid Manifest Configuration",
            ErrorKind::InputNotFound => "Input File Not Found",
            ErrorKind::SchemaInvalid => "Input Data Violates Schema",
            ErrorKind::OutputPermissionDenied => "Output Directory Not Writable",
            ErrorKind::OutputDiskFull => "Disk Space Exhausted",
            ErrorKind::PathTraversal => "Invalid Path (Security Check)",
            ErrorKind::LockTimeout => "Another Sync Is Running",
            ErrorKind::ValidationFailed => "Generated Output Failed Validation",
            ErrorKind::GenerationFailed => "Generation Engine Failed",
            ErrorKind::GenerationTimeout => "Generation Timed Out",
            ErrorKind::CommitFailed => "Commit Interrupted",
            ErrorKind::PreflightFailed => "Pre-flight Checks Failed",
            ErrorKind::InvalidTransition => "Invalid Transaction State",
            ErrorKind::Cancelled => "Sync Cancelled",
            ErrorKind::Io => "File System Error",
        }
    }

    /// Operator-facing suggestions for this kind of failure
    pub fn suggestions(&self) -> &'static [&'static str] {
        match self {
            ErrorKind::ManifestNotFound => &[
                "Make sure ggen.toml exists in the current directory",
                "Use --manifest to point at a different file",
            ],
            ErrorKind::ManifestInvalid => &[
                "Check TOML syntax (brackets, quotes, array-of-tables headers)",
                "Every [[transformations]] entry needs name, input_files or input_glob, and output_file",
            ],
            ErrorKind::InputNotFound => &[
                "Check that the input path in ggen.toml is correct",
                "Paths are resolved relative to the manifest directory",
            ],
            ErrorKind::SchemaInvalid => &[
                "Review the reported shape violations against the input data",
                "Test with a smaller shapes file to isolate the failing constraint",
            ],
            ErrorKind::OutputPermissionDenied => &[
                "Grant write access to the output directory",
                "Verify the directory owner matches the current user",
            ],
            ErrorKind::OutputDiskFull => &[
                "Free up space on the output filesystem",
                "Use an output root on a different disk",
            ],
            ErrorKind::PathTraversal => &[
                "Use only relative paths in output_file",
                "Remove '..' segments from the path",
            ],
            ErrorKind::LockTimeout => &[
                "Wait for the other sync to complete",
                "If no sync is running, remove the stale .ggen.lock file",
            ],
            ErrorKind::ValidationFailed => &[
                "Inspect the template that produced the rejected output",
                "Re-run with --no-validate-output only to debug the raw output",
            ],
            ErrorKind::GenerationFailed => &[
                "Run the generation engine manually for the failing transformation",
                "Check the engine command configured with --engine",
            ],
            ErrorKind::GenerationTimeout => &[
                "Simplify the query or template for this transformation",
                "Raise the per-transformation timeout in ggen.toml",
            ],
            ErrorKind::CommitFailed => &[
                "Re-run sync to resume the interrupted commit from its journal",
                "Inspect the failing path reported above",
            ],
            ErrorKind::PreflightFailed => &["Fix every listed pre-flight error, then retry"],
            ErrorKind::InvalidTransition => &["Start a new transaction for the next run"],
            ErrorKind::Cancelled => &["Re-run sync; the output tree was left unmodified"],
            ErrorKind::Io => &["Check the reported path and its permissions"],
        }
    }
}

// =============================================================================
// SYNC ERROR
// =============================================================================

/// Terminal failure of a sync run or one of its components
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("manifest file not found: {}", path.display())]
    ManifestNotFound { path: PathBuf },

    #[error("invalid manifest {}: {}", path.display(), field_errors.join("; "))]
    ManifestInvalid {
        path: PathBuf,
        field_errors: Vec<String>,
    },

    #[error("input file for '{transformation}' not found: {}", path.display())]
    InputNotFound {
        transformation: String,
        path: PathBuf,
    },

    #[error("schema validation failed: {}", violations.join("; "))]
    SchemaInvalid { violations: Vec<String> },

    #[error("permission denied at {}: {source}", path.display())]
    OutputPermissionDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no space left on device at {}: {source}", path.display())]
    OutputDiskFull {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid output path '{path}': parent traversal and absolute paths are not allowed")]
    InvalidPath { path: String },

    #[error(
        "could not acquire lock on {} within {timeout_secs}s{}",
        lock_file.display(),
        owner_pid.map(|pid| format!(" (held by PID {pid})")).unwrap_or_default()
    )]
    LockTimeout {
        lock_file: PathBuf,
        timeout_secs: u64,
        owner_pid: Option<u32>,
    },

    #[error("{format} validation failed for {path}: {detail}")]
    ValidationFailed {
        format: String,
        path: String,
        detail: String,
    },

    #[error("generation failed for '{transformation}': {message}")]
    GenerationFailed {
        transformation: String,
        message: String,
    },

    #[error("generation for '{transformation}' timed out after {timeout_secs}s")]
    GenerationTimeout {
        transformation: String,
        timeout_secs: u64,
    },

    #[error("commit failed while promoting {}: {source}", path.display())]
    CommitFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("pre-flight checks failed: {}", errors.join("; "))]
    PreflightFailed { errors: Vec<String> },

    #[error("cannot {operation}: transaction is {state}")]
    InvalidTransition {
        operation: &'static str,
        state: String,
    },

    #[error("sync cancelled before commit")]
    Cancelled,

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SyncError {
    /// Map an I/O error at `path` onto the taxonomy.
    ///
    /// Permission and storage exhaustion failures get their own kinds so
    /// recovery can give targeted guidance.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        match source.kind() {
            io::ErrorKind::PermissionDenied => SyncError::OutputPermissionDenied { path, source },
            io::ErrorKind::StorageFull => SyncError::OutputDiskFull { path, source },
            _ => SyncError::Io { path, source },
        }
    }

    /// Wrap an opaque engine failure
    pub fn generation(transformation: impl Into<String>, error: &anyhow::Error) -> Self {
        SyncError::GenerationFailed {
            transformation: transformation.into(),
            message: format!("{error:#}"),
        }
    }

    /// Taxonomy tag for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::ManifestNotFound { .. } => ErrorKind::ManifestNotFound,
            SyncError::ManifestInvalid { .. } => ErrorKind::ManifestInvalid,
            SyncError::InputNotFound { .. } => ErrorKind::InputNotFound,
            SyncError::SchemaInvalid { .. } => ErrorKind::SchemaInvalid,
            SyncError::OutputPermissionDenied { .. } => ErrorKind::OutputPermissionDenied,
            SyncError::OutputDiskFull { .. } => ErrorKind::OutputDiskFull,
            SyncError::InvalidPath { .. } => ErrorKind::PathTraversal,
            SyncError::LockTimeout { .. } => ErrorKind::LockTimeout,
            SyncError::ValidationFailed { .. } => ErrorKind::ValidationFailed,
            SyncError::GenerationFailed { .. } => ErrorKind::GenerationFailed,
            SyncError::GenerationTimeout { .. } => ErrorKind::GenerationTimeout,
            SyncError::CommitFailed { .. } => ErrorKind::CommitFailed,
            SyncError::PreflightFailed { .. } => ErrorKind::PreflightFailed,
            SyncError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            SyncError::Cancelled => ErrorKind::Cancelled,
            SyncError::Io { .. } => ErrorKind::Io,
        }
    }

    /// Render the error with its catalogue title and suggestions
    pub fn render(&self) -> String {
        let kind = self.kind();
        let mut out = format!("{}\n  {}\n", kind.title(), self);
        if !kind.suggestions().is_empty() {
            out.push_str("\n  Suggestions:\n");
            for suggestion in kind.suggestions() {
                out.push_str(&format!("    - {suggestion}\n"));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_permission_denied_maps_to_permission_kind() {
        let err = SyncError::io(
            "out/file.md",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.kind(), ErrorKind::OutputPermissionDenied);
        assert_eq!(err.kind().category(), "io_error");
    }

    #[test]
    fn io_storage_full_maps_to_disk_full() {
        let err = SyncError::io("out", io::Error::new(io::ErrorKind::StorageFull, "full"));
        assert_eq!(err.kind(), ErrorKind::OutputDiskFull);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn raw_enospc_maps_to_disk_full() {
        // ENOSPC
        let err = SyncError::io("out", io::Error::from_raw_os_error(28));
        assert_eq!(err.kind(), ErrorKind::OutputDiskFull);
    }

    #[test]
    fn other_io_errors_stay_generic() {
        let err = SyncError::io("out", io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn invalid_path_is_path_traversal_kind() {
        let err = SyncError::InvalidPath {
            path: "../etc/passwd".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::PathTraversal);
        assert!(err.to_string().contains("../etc/passwd"));
    }

    #[test]
    fn lock_timeout_message_names_owner() {
        let err = SyncError::LockTimeout {
            lock_file: PathBuf::from(".ggen.lock"),
            timeout_secs: 30,
            owner_pid: Some(4242),
        };
        assert!(err.to_string().contains("held by PID 4242"));
    }

    #[test]
    fn render_includes_title_and_suggestions() {
        let rendered = SyncError::Cancelled.render();
        assert!(rendered.starts_with("Sync Cancelled"));
        assert!(rendered.contains("Suggestions"));
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::OutputDiskFull).unwrap();
        assert_eq!(json, "\"output_disk_full\"");
        assert_eq!(ErrorKind::LockTimeout.as_ref(), "lock_timeout");
    }
}
