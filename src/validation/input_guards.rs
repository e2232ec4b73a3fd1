//! Path guards for manifest and staging paths
//!
//! Output paths come from user-authored manifests and end up joined onto the
//! output root, so they are checked before anything touches the filesystem.

use std::path::{Component, Path};
use thiserror::Error;

/// Result type for guard checks
pub type GuardResult<T> = Result<T, GuardError>;

/// Guard failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    /// String parameter is empty or contains only whitespace
    #[error("parameter '{parameter}' cannot be empty or whitespace-only")]
    EmptyString { parameter: String },

    /// Path contains a parent-directory segment
    #[error("path '{path}' contains a parent directory ('..') segment")]
    PathTraversal { path: String },

    /// Path is absolute (or carries a drive prefix)
    #[error("path '{path}' must be relative")]
    AbsolutePath { path: String },

    /// Path contains characters that are never valid in a manifest path
    #[error("path '{path}' contains invalid characters")]
    InvalidCharacters { path: String },
}

/// Validates that a string parameter is not empty or whitespace-only
///
/// # Examples
///
/// ```
/// use ggen_sync::validation::validate_non_empty_string;
///
/// assert!(validate_non_empty_string("name", "spec-docs").is_ok());
/// assert!(validate_non_empty_string("name", "   ").is_err());
/// ```
pub fn validate_non_empty_string<'a>(parameter_name: &str, value: &'a str) -> GuardResult<&'a str> {
    if value.trim().is_empty() {
        Err(GuardError::EmptyString {
            parameter: parameter_name.to_string(),
        })
    } else {
        Ok(value)
    }
}

/// Validates that a path is relative and free of traversal segments
///
/// Checks for:
/// - null bytes
/// - `..` components (a `..` inside a file name such as `a..b.md` is fine)
/// - absolute paths and Windows drive letters
/// - backslashes on Unix, which would otherwise hide a `..\` segment
///
/// # Examples
///
/// ```
/// use ggen_sync::validation::validate_path_safe;
///
/// assert!(validate_path_safe("docs/spec.md").is_ok());
/// assert!(validate_path_safe("../etc/passwd").is_err());
/// assert!(validate_path_safe("/etc/passwd").is_err());
/// ```
pub fn validate_path_safe(path: &str) -> GuardResult<&str> {
    if path.contains('\0') {
        return Err(GuardError::InvalidCharacters {
            path: path.to_string(),
        });
    }

    #[cfg(unix)]
    if path.contains('\\') {
        return Err(GuardError::InvalidCharacters {
            path: path.to_string(),
        });
    }

    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return Err(GuardError::AbsolutePath {
            path: path.to_string(),
        });
    }

    for component in Path::new(path).components() {
        match component {
            Component::ParentDir => {
                return Err(GuardError::PathTraversal {
                    path: path.to_string(),
                });
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(GuardError::AbsolutePath {
                    path: path.to_string(),
                });
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(path)
}
