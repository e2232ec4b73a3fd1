//! Structural validation of a loaded manifest.
//!
//! Every check runs for every transformation so the operator sees all
//! problems in one pass.

use super::{Manifest, TransformationSpec};
use crate::validation::{ValidationResult, validate_path_safe};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Component, Path, PathBuf};

/// Validate manifest structure and referenced files.
///
/// Checks:
/// - at least one transformation, `[project]` present (warning only)
/// - non-empty `name`, at least one input, non-empty `output_file`
/// - every input / schema / template / query file exists and opens for reading
/// - `output_file` is relative, traversal-free and outside `.ggen*` names
/// - unique transformation names and unique output files
/// - no output file sits where another output needs a directory
pub fn validate_manifest(manifest: &Manifest) -> ValidationResult {
    let mut result = ValidationResult::new();

    if manifest.project.is_none() {
        result.add_warning("Missing [project] section (optional)");
    }

    if manifest.transformations.is_empty() {
        result.add_error("Missing [[transformations]] section (at least one transformation is required)");
    }

    let mut seen_names: HashMap<&str, usize> = HashMap::new();
    let mut seen_outputs: IndexMap<PathBuf, &str> = IndexMap::new();

    for (index, transform) in manifest.transformations.iter().enumerate() {
        let label = if transform.name.trim().is_empty() {
            result.add_error(format!("transformations[{index}]: 'name' must not be empty"));
            format!("transformations[{index}]")
        } else {
            if let Some(first) = seen_names.insert(transform.name.as_str(), index) {
                result.add_error(format!(
                    "{}: duplicate transformation name (also used by transformations[{first}])",
                    transform.name
                ));
            }
            transform.name.clone()
        };

        check_inputs(&label, transform, &mut result);
        check_output(&label, transform, &mut result, &mut seen_outputs);
    }

    check_nested_outputs(&seen_outputs, &mut result);
    result
}

fn check_inputs(label: &str, transform: &TransformationSpec, result: &mut ValidationResult) {
    if transform.input_files.is_empty() {
        match &transform.input_glob {
            Some(pattern) => {
                result.add_error(format!("{label}: input_glob '{pattern}' matched no files"))
            }
            None => result.add_error(format!("{label}: no input files declared")),
        }
    }

    for input in &transform.input_files {
        check_readable(label, "Input file", input, result);
    }
    for schema in &transform.schema_files {
        check_readable(label, "Schema file", schema, result);
    }
    if let Some(template) = &transform.template {
        check_readable(label, "Template file", template, result);
    }
    if let Some(query) = &transform.query {
        check_readable(label, "Query file", query, result);
    }
}

fn check_readable(label: &str, what: &str, path: &Path, result: &mut ValidationResult) {
    if !path.exists() {
        result.add_error(format!("{label}: {what} not found: {}", path.display()));
    } else if !path.is_file() {
        result.add_error(format!("{label}: {what} is not a regular file: {}", path.display()));
    } else if let Err(e) = File::open(path) {
        result.add_error(format!(
            "{label}: {what} is not readable: {} ({e})",
            path.display()
        ));
    }
}

fn check_output<'a>(
    label: &str,
    transform: &'a TransformationSpec,
    result: &mut ValidationResult,
    seen_outputs: &mut IndexMap<PathBuf, &'a str>,
) {
    let output = transform.output_file.as_str();
    if output.trim().is_empty() {
        result.add_error(format!("{label}: 'output_file' must not be empty"));
        return;
    }

    if let Err(e) = validate_path_safe(output) {
        result.add_error(format!("{label}: unsafe output path: {e}"));
        return;
    }

    let normalized = normalize(output);
    if let Some(reserved) = reserved_component(&normalized) {
        result.add_error(format!(
            "{label}: output path '{output}' is under reserved name '{reserved}'"
        ));
        return;
    }

    if let Some(first) = seen_outputs.get(&normalized) {
        result.add_error(format!(
            "{label}: output file '{output}' collides with transformation '{first}'"
        ));
    } else {
        seen_outputs.insert(normalized, transform.name.as_str());
    }
}

/// `a` and `a/b.md` cannot both be written: one needs `a` as a file, the
/// other as a directory
fn check_nested_outputs(outputs: &IndexMap<PathBuf, &str>, result: &mut ValidationResult) {
    for (path, name) in outputs {
        let enclosing = path
            .ancestors()
            .skip(1)
            .filter(|a| !a.as_os_str().is_empty())
            .find_map(|a| outputs.get_key_value(a));
        if let Some((parent, owner)) = enclosing {
            result.add_error(format!(
                "{name}: output file '{}' needs '{}' as a directory, but it is the output of transformation '{owner}'",
                path.display(),
                parent.display()
            ));
        }
    }
}

/// Pipeline metadata lives under `.ggen*` names in the output root
fn reserved_component(path: &Path) -> Option<String> {
    path.components().find_map(|c| match c {
        Component::Normal(part) if part.to_string_lossy().starts_with(".ggen") => {
            Some(part.to_string_lossy().into_owned())
        }
        _ => None,
    })
}

/// `./docs/spec.md` and `docs/spec.md` name the same file
fn normalize(output: &str) -> PathBuf {
    Path::new(output)
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn spec(name: &str, input: PathBuf, output: &str) -> TransformationSpec {
        TransformationSpec {
            name: name.to_string(),
            input_files: vec![input],
            input_glob: None,
            schema_files: Vec::new(),
            template: None,
            query: None,
            output_file: output.to_string(),
            timeout: None,
            options: toml::Table::new(),
        }
    }

    fn manifest(transformations: Vec<TransformationSpec>) -> Manifest {
        Manifest {
            path: PathBuf::from("ggen.toml"),
            base_dir: PathBuf::new(),
            project: Some(toml::Table::new()),
            transformations,
        }
    }

    #[test]
    fn valid_manifest_passes() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.ttl");
        fs::write(&input, "@prefix ex: <http://example.org/> .").unwrap();

        let result = validate_manifest(&manifest(vec![spec("a", input, "out/a.md")]));
        assert!(result.is_valid(), "{:?}", result.errors);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn reports_every_problem_in_one_pass() {
        let result = validate_manifest(&manifest(vec![
            spec("a", PathBuf::from("/missing/a.ttl"), "../escape.md"),
            spec("b", PathBuf::from("/missing/b.ttl"), "/abs.md"),
        ]));

        assert_eq!(result.errors.len(), 4, "{:?}", result.errors);
        assert!(result.errors[0].contains("Input file not found"));
        assert!(result.errors[1].contains("unsafe output path"));
    }

    #[test]
    fn output_collision_reported_once_naming_both() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.ttl");
        fs::write(&input, "").unwrap();

        let result = validate_manifest(&manifest(vec![
            spec("first", input.clone(), "docs/spec.md"),
            spec("second", input, "./docs/spec.md"),
        ]));

        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("second"));
        assert!(result.errors[0].contains("first"));
    }

    #[test]
    fn reserved_output_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.ttl");
        fs::write(&input, "").unwrap();

        let result = validate_manifest(&manifest(vec![
            spec("lock", input.clone(), ".ggen.lock"),
            spec("staged", input.clone(), "./.ggen-staging/spec.md"),
            spec("nested", input.clone(), "docs/.ggen-state/x.md"),
            spec("fine", input, "docs/ggen.md"),
        ]));

        assert_eq!(result.errors.len(), 3, "{:?}", result.errors);
        assert!(result.errors[0].contains("'.ggen.lock'"));
        assert!(result.errors[1].contains("'.ggen-staging'"));
        assert!(result.errors[2].starts_with("nested:"));
    }

    #[test]
    fn file_and_directory_outputs_cannot_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.ttl");
        fs::write(&input, "").unwrap();

        let result = validate_manifest(&manifest(vec![
            spec("parent", input.clone(), "docs"),
            spec("child", input.clone(), "./docs/api/spec.md"),
            spec("sibling", input, "docs-extra/spec.md"),
        ]));

        assert_eq!(result.errors.len(), 1, "{:?}", result.errors);
        assert!(result.errors[0].starts_with("child:"));
        assert!(result.errors[0].contains("'parent'"));
    }

    #[test]
    fn empty_manifest_and_missing_project() {
        let mut m = manifest(Vec::new());
        m.project = None;

        let result = validate_manifest(&m);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.warnings.len(), 1);
    }
}
