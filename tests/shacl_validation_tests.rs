//! SHACL validation of transformation inputs read from disk

use ggen_sync::ontology::{SchemaValidator, StructuralEngine};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

// =============================================================================
// Helpers
// =============================================================================

const PREFIXES: &str = r#"@prefix sh: <http://www.w3.org/ns/shacl#> .
@prefix ex: <http://example.org/> .
@prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .
@prefix xsd: <http://www.w3.org/2001/XMLSchema#> .
"#;

fn write(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, format!("{PREFIXES}\n{body}")).unwrap();
    path
}

// =============================================================================
// Degraded mode
// =============================================================================

#[test]
fn structural_mode_checks_every_file() {
    let dir = TempDir::new().unwrap();
    let good = write(&dir, "good.ttl", "ex:a ex:p ex:b .\n");
    let bad = write(&dir, "bad.ttl", "ex:a ex:p [ ex:q ex:r .\n");
    let shapes = write(&dir, "shapes.ttl", "ex:S a sh:NodeShape ; sh:targetClass ex:T .\n");

    let validator = SchemaValidator::with_engine(Arc::new(StructuralEngine));
    assert_eq!(validator.mode(), "structural");

    let outcome = validator.validate_files(&[good.clone()], &[shapes.clone()]);
    assert!(outcome.valid, "{:?}", outcome.violations);

    let outcome = validator.validate_files(&[good, bad], &[shapes]);
    assert!(!outcome.valid);
    assert!(outcome.violations.iter().all(|v| v.starts_with("data:")));
}

#[test]
fn no_shape_files_skips_validation() {
    let dir = TempDir::new().unwrap();
    let data = write(&dir, "data.ttl", "ex:a ex:p ex:b .\n");

    let outcome = SchemaValidator::detect().validate_files(&[data], &[]);
    assert!(outcome.valid);
    assert!(outcome.details.skipped);
}

// =============================================================================
// SHACL engine
// =============================================================================

#[cfg(feature = "shacl")]
mod shacl {
    use super::*;

    const SHAPES: &str = r#"
ex:PersonShape a sh:NodeShape ;
    sh:targetClass ex:Person ;
    sh:property [
        sh:path ex:name ;
        sh:minCount 1 ;
        sh:maxCount 1 ;
        sh:pattern "^[A-Z]" ;
    ] ;
    sh:property [
        sh:path ex:knows ;
        sh:nodeKind sh:IRI ;
    ] .
"#;

    #[test]
    fn conforming_data_across_files() {
        let dir = TempDir::new().unwrap();
        let people = write(&dir, "people.ttl", "ex:alice a ex:Person ; ex:name \"Alice\" .\n");
        let links = write(&dir, "links.ttl", "ex:alice ex:knows ex:bob .\n");
        let shapes = write(&dir, "shapes.ttl", SHAPES);

        let outcome = SchemaValidator::detect().validate_files(&[people, links], &[shapes]);
        assert!(outcome.valid, "{:?}", outcome.violations);
        assert_eq!(outcome.details.validator, "shacl");
        assert_eq!(outcome.details.focus_nodes, 1);
    }

    #[test]
    fn cardinality_pattern_and_node_kind() {
        let dir = TempDir::new().unwrap();
        let data = write(
            &dir,
            "data.ttl",
            r#"
ex:alice a ex:Person ; ex:name "alice" .
ex:bob a ex:Person ; ex:name "Bob", "Robert" .
ex:carol a ex:Person ; ex:name "Carol" ; ex:knows "Dave" .
"#,
        );
        let shapes = write(&dir, "shapes.ttl", SHAPES);

        let outcome = SchemaValidator::detect().validate_files(&[data], &[shapes]);
        assert!(!outcome.valid);

        let has = |constraint: &str, focus: &str| {
            outcome
                .violations
                .iter()
                .any(|v| v.contains(constraint) && v.contains(focus))
        };
        assert!(has("sh:pattern", "alice"), "{:?}", outcome.violations);
        assert!(has("sh:maxCount", "bob"), "{:?}", outcome.violations);
        assert!(has("sh:nodeKind", "carol"), "{:?}", outcome.violations);
        assert_eq!(outcome.violations.len(), 3, "{:?}", outcome.violations);
    }

    #[test]
    fn subclass_instances_are_targeted() {
        let dir = TempDir::new().unwrap();
        let model = write(&dir, "model.ttl", "ex:Employee rdfs:subClassOf ex:Person .\n");
        let data = write(&dir, "data.ttl", "ex:dave a ex:Employee .\n");
        let shapes = write(&dir, "shapes.ttl", SHAPES);

        let outcome = SchemaValidator::detect().validate_files(&[model, data], &[shapes]);
        assert!(!outcome.valid);
        assert!(
            outcome
                .violations
                .iter()
                .any(|v| v.contains("dave") && v.contains("sh:minCount")),
            "{:?}",
            outcome.violations
        );
    }

    #[test]
    fn malformed_shapes_are_reported_not_panicked() {
        let dir = TempDir::new().unwrap();
        let data = write(&dir, "data.ttl", "ex:alice a ex:Person .\n");
        let shapes = dir.path().join("shapes.ttl");
        fs::write(&shapes, "ex:S a sh:NodeShape").unwrap();

        let outcome = SchemaValidator::detect().validate_files(&[data], &[shapes]);
        assert!(!outcome.valid);
        assert!(outcome.violations[0].starts_with("Shapes parse error"));
    }
}
