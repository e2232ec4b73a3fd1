//! Manifest loading (`ggen.toml`)
//!
//! The manifest is parsed straight into typed structures. Field-level problems
//! (missing `name`, no input source, missing `output_file`, bad timeout,
//! broken `input_glob`) are collected across every transformation and
//! reported together as one [`SyncError::ManifestInvalid`].
//!
//! ```toml
//! [project]
//! name = "spec-kit"
//!
//! [[transformations]]
//! name = "spec-docs"
//! input_files = ["ontology/spec.ttl"]
//! schema_files = ["ontology/shapes.ttl"]
//! template = "templates/spec.md.tera"
//! query = "queries/spec.rq"
//! output_file = "docs/spec.md"
//! timeout = "30s"
//! ```

mod validator;

pub use validator::validate_manifest;

use crate::error::{SyncError, SyncResult};
use globset::Glob;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use walkdir::WalkDir;

/// Default per-transformation timeout when the manifest does not set one
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

static TIMEOUT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)\s*([smh]?)\s*$").expect("timeout regex"));

// ============================================================================
// Typed manifest
// ============================================================================

/// A parsed manifest, loaded fresh for every run
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Where the manifest was read from
    pub path: PathBuf,
    /// Directory relative input paths are resolved against
    pub base_dir: PathBuf,
    /// Free-form `[project]` table, if present
    pub project: Option<toml::Table>,
    /// Transformations in manifest order
    pub transformations: Vec<TransformationSpec>,
}

/// One input → output unit of work
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformationSpec {
    pub name: String,
    pub input_files: Vec<PathBuf>,
    /// Original glob when inputs came from `input_glob`
    pub input_glob: Option<String>,
    pub schema_files: Vec<PathBuf>,
    pub template: Option<PathBuf>,
    pub query: Option<PathBuf>,
    /// Path relative to the output root
    pub output_file: String,
    pub timeout: Option<Duration>,
    /// Keys the pipeline does not interpret; handed through to the engine
    pub options: toml::Table,
}

impl TransformationSpec {
    /// Every file whose content influences this transformation's output
    pub fn tracked_files(&self) -> Vec<&Path> {
        self.input_files
            .iter()
            .chain(self.schema_files.iter())
            .chain(self.template.iter())
            .chain(self.query.iter())
            .map(PathBuf::as_path)
            .collect()
    }

    /// Timeout for the generation engine
    pub fn effective_timeout(&self, default: Duration) -> Duration {
        self.timeout.unwrap_or(default)
    }
}

impl Manifest {
    /// Load and type a manifest file.
    ///
    /// # Errors
    /// - [`SyncError::ManifestNotFound`] if the file does not exist
    /// - [`SyncError::ManifestInvalid`] for TOML syntax errors or field errors
    pub fn load(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(SyncError::ManifestNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        Self::parse(&content, path, &base_dir)
    }

    /// Parse manifest text; `base_dir` anchors relative input paths
    pub fn parse(content: &str, path: &Path, base_dir: &Path) -> SyncResult<Self> {
        let raw: RawManifest = toml::from_str(content).map_err(|e| SyncError::ManifestInvalid {
            path: path.to_path_buf(),
            field_errors: vec![e.to_string()],
        })?;

        let mut field_errors = Vec::new();
        let mut transformations = Vec::with_capacity(raw.transformations.len());

        for (index, raw_transform) in raw.transformations.into_iter().enumerate() {
            match raw_transform.into_spec(index, base_dir) {
                Ok(spec) => transformations.push(spec),
                Err(errors) => field_errors.extend(errors),
            }
        }

        if !field_errors.is_empty() {
            return Err(SyncError::ManifestInvalid {
                path: path.to_path_buf(),
                field_errors,
            });
        }

        tracing::debug!(
            manifest = %path.display(),
            transformations = transformations.len(),
            "manifest loaded"
        );

        Ok(Self {
            path: path.to_path_buf(),
            base_dir: base_dir.to_path_buf(),
            project: raw.project,
            transformations,
        })
    }

    pub fn transformation_names(&self) -> Vec<String> {
        self.transformations.iter().map(|t| t.name.clone()).collect()
    }

    pub fn transformation(&self, name: &str) -> Option<&TransformationSpec> {
        self.transformations.iter().find(|t| t.name == name)
    }
}

// ============================================================================
// Raw (serde) layer
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawManifest {
    project: Option<toml::Table>,
    #[serde(default)]
    transformations: Vec<RawTransformation>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TimeoutSpec {
    Seconds(i64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RawTransformation {
    name: Option<String>,
    input_files: Option<OneOrMany>,
    input_glob: Option<String>,
    schema_files: Option<OneOrMany>,
    template: Option<String>,
    #[serde(alias = "sparql_query")]
    query: Option<String>,
    output_file: Option<String>,
    timeout: Option<TimeoutSpec>,
    #[serde(flatten)]
    options: toml::Table,
}

impl RawTransformation {
    fn into_spec(self, index: usize, base_dir: &Path) -> Result<TransformationSpec, Vec<String>> {
        let mut errors = Vec::new();
        let label = self
            .name
            .clone()
            .unwrap_or_else(|| format!("transformations[{index}]"));

        if self.name.is_none() {
            errors.push(format!("{label}: missing 'name'"));
        }
        if self.input_files.is_none() && self.input_glob.is_none() {
            errors.push(format!("{label}: missing 'input_files' or 'input_glob'"));
        }
        if self.output_file.is_none() {
            errors.push(format!("{label}: missing 'output_file'"));
        }

        let timeout = match self.timeout.map(parse_timeout_spec).transpose() {
            Ok(timeout) => timeout,
            Err(message) => {
                errors.push(format!("{label}: {message}"));
                None
            }
        };

        let mut input_files: Vec<PathBuf> = self
            .input_files
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
            .into_iter()
            .map(|p| resolve(base_dir, &p))
            .collect();

        if let Some(pattern) = &self.input_glob {
            match expand_glob(base_dir, pattern) {
                Ok(matches) => {
                    for path in matches {
                        if !input_files.contains(&path) {
                            input_files.push(path);
                        }
                    }
                }
                Err(message) => errors.push(format!("{label}: {message}")),
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(TransformationSpec {
            name: self.name.unwrap_or_default(),
            input_files,
            input_glob: self.input_glob,
            schema_files: self
                .schema_files
                .map(OneOrMany::into_vec)
                .unwrap_or_default()
                .into_iter()
                .map(|p| resolve(base_dir, &p))
                .collect(),
            template: self.template.map(|p| resolve(base_dir, &p)),
            query: self.query.map(|p| resolve(base_dir, &p)),
            output_file: self.output_file.unwrap_or_default(),
            timeout,
            options: self.options,
        })
    }
}

fn resolve(base_dir: &Path, value: &str) -> PathBuf {
    let path = Path::new(value);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Expand `pattern` relative to `base_dir`; results are sorted so runs are
/// deterministic regardless of directory iteration order.
fn expand_glob(base_dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, String> {
    let matcher = Glob::new(pattern)
        .map_err(|e| format!("invalid input_glob '{pattern}': {e}"))?
        .compile_matcher();

    let root = if base_dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        base_dir
    };

    let mut matches: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with(".ggen")
        })
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(root).ok()?.to_path_buf();
            matcher
                .is_match(&relative)
                .then(|| base_dir.join(relative))
        })
        .collect();

    matches.sort();
    Ok(matches)
}

// ============================================================================
// Timeouts
// ============================================================================

/// Parse a timeout such as `"30s"`, `"5m"`, `"1h"` or `"120"` (seconds)
///
/// # Examples
///
/// ```
/// use ggen_sync::manifest::parse_timeout;
/// use std::time::Duration;
///
/// assert_eq!(parse_timeout("30s").unwrap(), Duration::from_secs(30));
/// assert_eq!(parse_timeout("5m").unwrap(), Duration::from_secs(300));
/// assert!(parse_timeout("0").is_err());
/// ```
pub fn parse_timeout(value: &str) -> Result<Duration, String> {
    let captures = TIMEOUT_RE
        .captures(value)
        .ok_or_else(|| format!("invalid timeout '{value}': expected e.g. 30s, 5m or 120"))?;

    let amount: u64 = captures[1]
        .parse()
        .map_err(|_| format!("invalid timeout '{value}': number out of range"))?;
    if amount == 0 {
        return Err(format!("timeout must be positive: '{value}'"));
    }

    let multiplier = match &captures[2] {
        "m" => 60,
        "h" => 3600,
        _ => 1,
    };

    amount
        .checked_mul(multiplier)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("invalid timeout '{value}': number out of range"))
}

fn parse_timeout_spec(spec: TimeoutSpec) -> Result<Duration, String> {
    match spec {
        TimeoutSpec::Seconds(secs) if secs > 0 => Ok(Duration::from_secs(secs as u64)),
        TimeoutSpec::Seconds(secs) => Err(format!("timeout must be positive: {secs}")),
        TimeoutSpec::Text(text) => parse_timeout(&text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn parse(content: &str) -> SyncResult<Manifest> {
        Manifest::parse(content, Path::new("ggen.toml"), Path::new("/project"))
    }

    #[test]
    fn parses_full_transformation() {
        let manifest = parse(
            r#"
            [project]
            name = "demo"

            [[transformations]]
            name = "spec-docs"
            input_files = ["ontology/spec.ttl"]
            schema_files = "ontology/shapes.ttl"
            template = "templates/spec.tera"
            sparql_query = "queries/spec.rq"
            output_file = "docs/spec.md"
            timeout = "5m"
            style = "compact"
            "#,
        )
        .unwrap();

        assert!(manifest.project.is_some());
        let spec = &manifest.transformations[0];
        assert_eq!(spec.name, "spec-docs");
        assert_eq!(spec.input_files, vec![PathBuf::from("/project/ontology/spec.ttl")]);
        assert_eq!(spec.schema_files, vec![PathBuf::from("/project/ontology/shapes.ttl")]);
        assert_eq!(spec.query, Some(PathBuf::from("/project/queries/spec.rq")));
        assert_eq!(spec.timeout, Some(Duration::from_secs(300)));
        assert_eq!(spec.options.get("style").and_then(|v| v.as_str()), Some("compact"));
        assert_eq!(spec.tracked_files().len(), 4);
    }

    #[test]
    fn collects_field_errors_across_transformations() {
        let err = parse(
            r#"
            [[transformations]]
            input_files = ["a.ttl"]
            output_file = "a.md"

            [[transformations]]
            name = "second"
            "#,
        )
        .unwrap_err();

        assert_matches!(err, SyncError::ManifestInvalid { ref field_errors, .. } => {
            assert_eq!(field_errors.len(), 3);
            assert!(field_errors[0].contains("transformations[0]: missing 'name'"));
            assert!(field_errors.iter().any(|e| e == "second: missing 'output_file'"));
        });
    }

    #[test]
    fn syntax_error_is_manifest_invalid() {
        let err = parse("[[transformations]\nname = ").unwrap_err();
        assert_matches!(err, SyncError::ManifestInvalid { .. });
    }

    #[test]
    fn missing_file_is_manifest_not_found() {
        let err = Manifest::load("/definitely/not/here/ggen.toml").unwrap_err();
        assert_matches!(err, SyncError::ManifestNotFound { .. });
    }

    #[test]
    fn timeout_parsing() {
        assert_eq!(parse_timeout("45").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_timeout(" 2h ").unwrap(), Duration::from_secs(7200));
        assert!(parse_timeout("fast").is_err());
        assert!(parse_timeout("-5s").is_err());
        assert!(parse_timeout_spec(TimeoutSpec::Seconds(0)).is_err());
    }

    #[test]
    fn input_glob_expands_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("ontology/nested")).unwrap();
        fs::write(dir.path().join("ontology/b.ttl"), "").unwrap();
        fs::write(dir.path().join("ontology/a.ttl"), "").unwrap();
        fs::write(dir.path().join("ontology/nested/c.ttl"), "").unwrap();
        fs::write(dir.path().join("ontology/readme.md"), "").unwrap();

        let manifest = Manifest::parse(
            r#"
            [[transformations]]
            name = "all"
            input_glob = "ontology/**/*.ttl"
            output_file = "out.md"
            "#,
            &dir.path().join("ggen.toml"),
            dir.path(),
        )
        .unwrap();

        let inputs = &manifest.transformations[0].input_files;
        assert_eq!(
            inputs,
            &vec![
                dir.path().join("ontology/a.ttl"),
                dir.path().join("ontology/b.ttl"),
                dir.path().join("ontology/nested/c.ttl"),
            ]
        );
    }
}
