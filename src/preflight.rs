//! Pre-flight environment checks
//!
//! Runs before any generation work and never modifies the output tree: a
//! missing output directory is checked through its nearest existing ancestor
//! and left for the commit to create. Every check runs for every
//! transformation regardless of earlier failures.

use crate::manifest::{Manifest, TransformationSpec, validate_manifest};
use crate::validation::validate_path_safe;
use indexmap::{IndexMap, IndexSet};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use sysinfo::Disks;

/// Minimum free space on the output filesystem before a warning is raised
pub const MIN_FREE_BYTES: u64 = 10 * 1024 * 1024;

const WRITE_SENTINEL: &str = ".ggen-write-test";

/// Result of a pre-flight run
///
/// `passed` is derived from `errors`, so a result can never claim success
/// while carrying errors.
#[derive(Debug, Clone, Default)]
pub struct PreFlightCheckResult {
    errors: IndexSet<String>,
    warnings: Vec<String>,
    checks_run: IndexMap<String, bool>,
}

impl PreFlightCheckResult {
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(String::as_str)
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Check name → outcome, in the order checks ran
    pub fn checks_run(&self) -> &IndexMap<String, bool> {
        &self.checks_run
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    fn record(&mut self, check: String, ok: bool) {
        // a check that runs once per file only passes if every file passed
        let entry = self.checks_run.entry(check).or_insert(true);
        *entry = *entry && ok;
    }

    fn error(&mut self, message: String) {
        self.errors.insert(message);
    }

    fn warning(&mut self, message: String) {
        self.warnings.push(message);
    }

    /// Consume into the error list used by [`crate::SyncError::PreflightFailed`]
    pub fn into_errors(self) -> Vec<String> {
        self.errors.into_iter().collect()
    }
}

impl Serialize for PreFlightCheckResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("PreFlightCheckResult", 4)?;
        state.serialize_field("passed", &self.passed())?;
        state.serialize_field("errors", &self.errors)?;
        state.serialize_field("warnings", &self.warnings)?;
        state.serialize_field("checks_run", &self.checks_run)?;
        state.end()
    }
}

/// Runs environment checks against one output root
#[derive(Debug, Clone)]
pub struct PreflightChecker {
    output_root: PathBuf,
    min_free_bytes: u64,
}

impl PreflightChecker {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            min_free_bytes: MIN_FREE_BYTES,
        }
    }

    /// Override the free-space threshold
    pub fn with_min_free_bytes(mut self, bytes: u64) -> Self {
        self.min_free_bytes = bytes;
        self
    }

    pub fn run(&self, manifest: &Manifest) -> PreFlightCheckResult {
        let mut result = PreFlightCheckResult::default();

        let structure = validate_manifest(manifest);
        result.record("manifest_structure".to_string(), structure.is_valid());
        for error in structure.errors {
            result.error(error);
        }
        result.warnings.extend(structure.warnings);

        for (index, transform) in manifest.transformations.iter().enumerate() {
            let name = if transform.name.trim().is_empty() {
                format!("transformations[{index}]")
            } else {
                transform.name.clone()
            };
            self.check_transformation(&name, transform, &mut result);
        }

        tracing::info!(
            passed = result.passed(),
            errors = result.error_count(),
            warnings = result.warnings.len(),
            checks = result.checks_run.len(),
            "pre-flight checks complete"
        );

        result
    }

    fn check_transformation(
        &self,
        name: &str,
        transform: &TransformationSpec,
        result: &mut PreFlightCheckResult,
    ) {
        for input in &transform.input_files {
            check_readable(name, "input", input, result);
        }
        for schema in &transform.schema_files {
            if check_readable(name, "schema", schema, result) {
                check_schema_structure(name, schema, result);
            }
        }
        if let Some(template) = &transform.template {
            check_readable(name, "template", template, result);
        }
        if let Some(query) = &transform.query {
            check_readable(name, "query", query, result);
        }

        // unsafe output paths are already reported by manifest validation
        if transform.output_file.trim().is_empty()
            || validate_path_safe(&transform.output_file).is_err()
        {
            return;
        }

        let output_dir = self
            .output_root
            .join(&transform.output_file)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.output_root.clone());

        let writable = check_writable(&output_dir);
        result.record(format!("{name}:output_writable"), writable.is_ok());
        match writable {
            Ok(existing) => self.check_disk_space(name, &existing, result),
            Err(e) => result.error(format!(
                "{name}: Output directory not writable: {} ({e})",
                output_dir.display()
            )),
        }
    }

    fn check_disk_space(&self, name: &str, dir: &Path, result: &mut PreFlightCheckResult) {
        let check = format!("{name}:disk_space");
        match available_bytes(dir) {
            Ok(Some(free)) => {
                let enough = free >= self.min_free_bytes;
                result.record(check, enough);
                if !enough {
                    result.warning(format!(
                        "{name}: Low disk space: {:.1}MB available in {}",
                        free as f64 / (1024.0 * 1024.0),
                        dir.display()
                    ));
                }
            }
            Ok(None) => {
                result.record(check, true);
                result.warning(format!(
                    "{name}: Disk space check skipped (no disk found for {})",
                    dir.display()
                ));
            }
            Err(e) => {
                result.record(check, true);
                result.warning(format!("{name}: Disk space check skipped: {e}"));
            }
        }
    }
}

/// Open-for-read check; records `<name>:<what>_readable`
fn check_readable(name: &str, what: &str, path: &Path, result: &mut PreFlightCheckResult) -> bool {
    let readable = path.is_file() && File::open(path).is_ok();
    result.record(format!("{name}:{what}_readable"), readable);
    if !readable {
        result.error(format!(
            "{name}: Cannot read {what} file: {}",
            path.display()
        ));
    }
    readable
}

fn check_schema_structure(name: &str, path: &Path, result: &mut PreFlightCheckResult) {
    let check = format!("{name}:schema_structure");
    match fs::read_to_string(path) {
        Ok(content) => {
            let plausible = looks_like_rdf(&content);
            result.record(check, plausible);
            if !plausible {
                result.warning(format!(
                    "{name}: Schema file may have invalid RDF syntax: {}",
                    path.display()
                ));
            }
        }
        Err(e) => {
            result.record(check, false);
            result.warning(format!("{name}: Error reading schema file: {e}"));
        }
    }
}

/// Heuristic: prefix directives or common RDF predicate markers
pub fn looks_like_rdf(content: &str) -> bool {
    content.lines().any(|line| {
        let line = line.trim_start();
        line.starts_with("@prefix")
            || line.starts_with("PREFIX")
            || line.contains(" a ")
            || line.contains("rdf:")
            || line.contains("rdfs:")
            || line.contains("sh:")
    })
}

/// Create the directory if needed, then create and delete a sentinel file
/// Write-test the nearest existing ancestor of `dir` and return it.
/// Missing directories are not created.
fn check_writable(dir: &Path) -> io::Result<PathBuf> {
    let existing = existing_ancestor(dir)?;
    let sentinel = existing.join(WRITE_SENTINEL);
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&sentinel)?;
    fs::remove_file(&sentinel)?;
    Ok(existing)
}

fn existing_ancestor(dir: &Path) -> io::Result<PathBuf> {
    for candidate in dir.ancestors() {
        let candidate = if candidate.as_os_str().is_empty() {
            Path::new(".")
        } else {
            candidate
        };
        match fs::metadata(candidate) {
            Ok(meta) if meta.is_dir() => return Ok(candidate.to_path_buf()),
            Ok(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::NotADirectory,
                    format!("{} is not a directory", candidate.display()),
                ));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::NotFound,
        format!("no existing ancestor of {}", dir.display()),
    ))
}

/// Free space on the disk whose mount point is the longest prefix of `dir`
fn available_bytes(dir: &Path) -> io::Result<Option<u64>> {
    let dir = dir.canonicalize()?;
    let disks = Disks::new_with_refreshed_list();
    Ok(disks
        .iter()
        .filter(|disk| dir.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space()))
}
