//! SHACL (Shapes Constraint Language) validation of transformation inputs
//!
//! # Components
//!
//! - **ShapeEngine**: capability interface, chosen once at construction
//! - **ShaclEngine**: SHACL-core subset evaluated with SPARQL over an
//!   oxigraph store (available with the `shacl` feature)
//! - **StructuralEngine**: Turtle syntax sanity check used when no SHACL
//!   engine is compiled in
//! - **SchemaValidator**: front door used by the pipeline
//!
//! Malformed data or shapes never panic; they produce an invalid outcome
//! describing the parse failure.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

static PREFIX_DECL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:@prefix|\bprefix)\s+([A-Za-z][\w.-]*)?:").expect("prefix decl regex")
});
static PREFIX_USE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^\w:.-])([A-Za-z][\w-]*)?:[\w]").expect("prefix use regex"));

// =============================================================================
// Outcome
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDetails {
    /// Engine that produced the outcome (`shacl` or `structural`)
    pub validator: String,
    pub skipped: bool,
    pub shapes_checked: usize,
    pub focus_nodes: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaValidationOutcome {
    pub valid: bool,
    pub violations: Vec<String>,
    pub warnings: Vec<String>,
    pub details: SchemaDetails,
}

impl SchemaValidationOutcome {
    fn new(validator: &str) -> Self {
        Self {
            valid: true,
            details: SchemaDetails {
                validator: validator.to_string(),
                ..SchemaDetails::default()
            },
            ..Self::default()
        }
    }

    fn violation(&mut self, message: impl Into<String>) {
        self.valid = false;
        self.violations.push(message.into());
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

// =============================================================================
// Engines
// =============================================================================

/// A way of checking data against shapes
pub trait ShapeEngine: fmt::Debug + Send + Sync {
    /// Short mode name reported in `details.validator`
    fn name(&self) -> &'static str;

    /// Check `data` against non-empty `shapes`; both are Turtle
    fn check(&self, data: &str, shapes: &str) -> SchemaValidationOutcome;
}

/// Front door for schema validation
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    engine: Arc<dyn ShapeEngine>,
}

impl SchemaValidator {
    /// Pick the best engine compiled into this build
    pub fn detect() -> Self {
        #[cfg(feature = "shacl")]
        let engine: Arc<dyn ShapeEngine> = Arc::new(ShaclEngine);
        #[cfg(not(feature = "shacl"))]
        let engine: Arc<dyn ShapeEngine> = Arc::new(StructuralEngine);

        tracing::info!(validator = engine.name(), "schema validator selected");
        Self { engine }
    }

    pub fn with_engine(engine: Arc<dyn ShapeEngine>) -> Self {
        tracing::info!(validator = engine.name(), "schema validator selected");
        Self { engine }
    }

    pub fn mode(&self) -> &'static str {
        self.engine.name()
    }

    /// Validate Turtle `data` against optional Turtle `shapes`
    pub fn validate(&self, data: &str, shapes: Option<&str>) -> SchemaValidationOutcome {
        let Some(shapes) = shapes.filter(|s| !s.trim().is_empty()) else {
            let mut outcome = SchemaValidationOutcome::new(self.engine.name());
            outcome.details.skipped = true;
            outcome.warning("No SHACL shapes provided, validation skipped");
            return outcome;
        };

        let outcome = self.engine.check(data, shapes);
        tracing::debug!(
            validator = outcome.details.validator.as_str(),
            valid = outcome.valid,
            violations = outcome.violations.len(),
            "schema validation finished"
        );
        outcome
    }

    /// Concatenate and validate files; unreadable files become violations
    pub fn validate_files<P: AsRef<Path>>(
        &self,
        data_paths: &[P],
        shape_paths: &[P],
    ) -> SchemaValidationOutcome {
        let mut read_errors = Vec::new();
        let data = concat_files(data_paths, "data", &mut read_errors);
        let shapes = concat_files(shape_paths, "shapes", &mut read_errors);

        if !read_errors.is_empty() {
            let mut outcome = SchemaValidationOutcome::new(self.engine.name());
            for error in read_errors {
                outcome.violation(error);
            }
            return outcome;
        }

        let shapes = (!shape_paths.is_empty()).then_some(shapes.as_str());
        self.validate(&data, shapes)
    }
}

fn concat_files<P: AsRef<Path>>(paths: &[P], what: &str, errors: &mut Vec<String>) -> String {
    let mut combined = String::new();
    for path in paths {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => {
                combined.push_str(&content);
                combined.push('\n');
            }
            Err(e) => errors.push(format!("Cannot read {what} file {}: {e}", path.display())),
        }
    }
    combined
}

// =============================================================================
// Structural engine (degraded mode)
// =============================================================================

/// Basic Turtle syntax check: balanced delimiters, terminated statements and
/// declared prefixes. Shape constraints are not evaluated.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralEngine;

impl ShapeEngine for StructuralEngine {
    fn name(&self) -> &'static str {
        "structural"
    }

    fn check(&self, data: &str, shapes: &str) -> SchemaValidationOutcome {
        let mut outcome = SchemaValidationOutcome::new(self.name());
        outcome.warning(
            "SHACL engine not available in this build; performed basic Turtle syntax check only",
        );

        for (label, content) in [("data", data), ("shapes", shapes)] {
            for problem in turtle_problems(content) {
                outcome.violation(format!("{label}: {problem}"));
            }
        }
        outcome
    }
}

/// Syntax problems found by a lexical pass over Turtle text
pub fn turtle_problems(content: &str) -> Vec<String> {
    let (cleaned, mut problems) = strip_literals(content);

    let mut stacks: [Vec<(usize, usize)>; 2] = [Vec::new(), Vec::new()];
    for (line_idx, line) in cleaned.lines().enumerate() {
        for (col_idx, ch) in line.chars().enumerate() {
            let (line_no, col) = (line_idx + 1, col_idx + 1);
            match ch {
                '(' => stacks[0].push((line_no, col)),
                '[' => stacks[1].push((line_no, col)),
                ')' if stacks[0].pop().is_none() => {
                    problems.push(format!("Unmatched ')' at {line_no}:{col}"))
                }
                ']' if stacks[1].pop().is_none() => {
                    problems.push(format!("Unmatched ']' at {line_no}:{col}"))
                }
                _ => {}
            }
        }
    }
    for (stack, open) in stacks.iter().zip(['(', '[']) {
        if let Some((line, col)) = stack.first() {
            problems.push(format!("Unclosed '{open}' at {line}:{col}"));
        }
    }

    let last_statement = cleaned
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| {
            let lower = line.to_ascii_lowercase();
            !(lower.starts_with("prefix") || lower.starts_with("base"))
        })
        .last();
    if let Some(line) = last_statement {
        if !line.ends_with('.') {
            problems.push("Last statement is not terminated with '.'".to_string());
        }
    }

    let declared: HashSet<&str> = PREFIX_DECL_RE
        .captures_iter(&cleaned)
        .map(|c| c.get(1).map_or("", |m| m.as_str()))
        .collect();
    let mut reported = HashSet::new();
    for (line_idx, line) in cleaned.lines().enumerate() {
        let lower = line.trim_start().to_ascii_lowercase();
        if lower.starts_with("@prefix") || lower.starts_with("prefix") {
            continue;
        }
        for captures in PREFIX_USE_RE.captures_iter(line) {
            let prefix = captures.get(1).map_or("", |m| m.as_str());
            if prefix != "_" && !declared.contains(prefix) && reported.insert(prefix.to_string()) {
                problems.push(format!(
                    "Undeclared prefix '{prefix}:' first used at line {}",
                    line_idx + 1
                ));
            }
        }
    }

    problems
}

/// Blank out comments, IRIs and string literals, preserving line structure
fn strip_literals(content: &str) -> (String, Vec<String>) {
    let chars: Vec<char> = content.chars().collect();
    let mut out = String::with_capacity(content.len());
    let mut problems = Vec::new();
    let mut line = 1usize;
    let mut i = 0usize;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '<' => {
                let start_line = line;
                i += 1;
                while i < chars.len() && chars[i] != '>' && chars[i] != '\n' {
                    i += 1;
                }
                if i >= chars.len() || chars[i] == '\n' {
                    problems.push(format!("Unterminated IRI at line {start_line}"));
                } else {
                    i += 1;
                }
                out.push_str("<>");
            }
            '"' | '\'' => {
                let start_line = line;
                let triple = chars.get(i + 1) == Some(&ch) && chars.get(i + 2) == Some(&ch);
                let width = if triple { 3 } else { 1 };
                i += width;
                let mut closed = false;
                while i < chars.len() {
                    match chars[i] {
                        '\\' => i += 2,
                        '\n' if !triple => break,
                        '\n' => {
                            line += 1;
                            out.push('\n');
                            i += 1;
                        }
                        c if c == ch
                            && (!triple
                                || (chars.get(i + 1) == Some(&ch)
                                    && chars.get(i + 2) == Some(&ch))) =>
                        {
                            i += width;
                            closed = true;
                            break;
                        }
                        _ => i += 1,
                    }
                }
                if !closed {
                    problems.push(format!("Unterminated string literal at line {start_line}"));
                }
                out.push_str("\"\"");
            }
            '\n' => {
                line += 1;
                out.push('\n');
                i += 1;
            }
            _ => {
                out.push(ch);
                i += 1;
            }
        }
    }

    (out, problems)
}

// =============================================================================
// SHACL engine
// =============================================================================

#[cfg(feature = "shacl")]
pub use engine::ShaclEngine;

#[cfg(feature = "shacl")]
mod engine {
    use super::{SchemaValidationOutcome, ShapeEngine};
    use anyhow::{Context, Result, anyhow};
    use indexmap::IndexMap;
    use oxigraph::io::RdfFormat;
    use oxigraph::model::Term;
    use oxigraph::sparql::{QueryResults, QuerySolution};
    use oxigraph::store::Store;
    use regex::Regex;

    const SH_NS: &str = "http://www.w3.org/ns/shacl#";
    const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
    const RDFS_SUBCLASS: &str = "http://www.w3.org/2000/01/rdf-schema#subClassOf";

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Severity {
        Info,
        Warning,
        Violation,
    }

    impl Severity {
        fn from_term(term: Option<&Term>) -> Option<Self> {
            match term_iri(term?)?.strip_prefix(SH_NS)? {
                "Info" => Some(Severity::Info),
                "Warning" => Some(Severity::Warning),
                "Violation" => Some(Severity::Violation),
                _ => None,
            }
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum NodeKind {
        Iri,
        BlankNode,
        Literal,
        BlankNodeOrIri,
        BlankNodeOrLiteral,
        IriOrLiteral,
    }

    impl NodeKind {
        fn from_term(term: Option<&Term>) -> Option<Self> {
            match term_iri(term?)?.strip_prefix(SH_NS)? {
                "IRI" => Some(NodeKind::Iri),
                "BlankNode" => Some(NodeKind::BlankNode),
                "Literal" => Some(NodeKind::Literal),
                "BlankNodeOrIRI" => Some(NodeKind::BlankNodeOrIri),
                "BlankNodeOrLiteral" => Some(NodeKind::BlankNodeOrLiteral),
                "IRIOrLiteral" => Some(NodeKind::IriOrLiteral),
                _ => None,
            }
        }

        fn accepts(self, term: &Term) -> bool {
            let (iri, blank, literal) = match term {
                Term::NamedNode(_) => (true, false, false),
                Term::BlankNode(_) => (false, true, false),
                Term::Literal(_) => (false, false, true),
                #[allow(unreachable_patterns)]
                _ => (false, false, false),
            };
            match self {
                NodeKind::Iri => iri,
                NodeKind::BlankNode => blank,
                NodeKind::Literal => literal,
                NodeKind::BlankNodeOrIri => blank || iri,
                NodeKind::BlankNodeOrLiteral => blank || literal,
                NodeKind::IriOrLiteral => iri || literal,
            }
        }
    }

    #[derive(Debug, Clone)]
    struct PropertyShape {
        path: String,
        min_count: Option<usize>,
        max_count: Option<usize>,
        datatype: Option<String>,
        class: Option<String>,
        pattern: Option<Regex>,
        node_kind: Option<NodeKind>,
        message: Option<String>,
        severity: Option<Severity>,
    }

    #[derive(Debug, Clone)]
    struct NodeShape {
        id: String,
        target_class: String,
        severity: Severity,
        message: Option<String>,
        properties: Vec<PropertyShape>,
    }

    /// SHACL-core subset: `sh:targetClass`, `sh:property`/`sh:path`,
    /// `sh:minCount`, `sh:maxCount`, `sh:datatype`, `sh:class`, `sh:pattern`,
    /// `sh:nodeKind`, `sh:message`, `sh:severity`
    #[derive(Debug, Clone, Copy, Default)]
    pub struct ShaclEngine;

    impl ShapeEngine for ShaclEngine {
        fn name(&self) -> &'static str {
            "shacl"
        }

        fn check(&self, data: &str, shapes: &str) -> SchemaValidationOutcome {
            let mut outcome = SchemaValidationOutcome::new(self.name());
            let stores = load_turtle(data)
                .context("Data parse error")
                .and_then(|data| Ok((data, load_turtle(shapes).context("Shapes parse error")?)));

            let (data_store, shapes_store) = match stores {
                Ok(stores) => stores,
                Err(e) => {
                    outcome.violation(format!("{e:#}"));
                    return outcome;
                }
            };

            if let Err(e) = evaluate(&data_store, &shapes_store, &mut outcome) {
                outcome.violation(format!("SHACL evaluation failed: {e:#}"));
            }
            outcome
        }
    }

    fn load_turtle(turtle: &str) -> Result<Store> {
        let store = Store::new()?;
        store
            .load_from_reader(RdfFormat::Turtle, turtle.as_bytes())
            .map_err(|e| anyhow!("{e}"))?;
        Ok(store)
    }

    fn evaluate(data: &Store, shapes: &Store, outcome: &mut SchemaValidationOutcome) -> Result<()> {
        let node_shapes = load_shapes(shapes, outcome)?;
        outcome.details.shapes_checked = node_shapes.len();

        for shape in &node_shapes {
            let focus_nodes = focus_values(data, &shape.target_class, None)?;
            outcome.details.focus_nodes += focus_nodes.len();

            for property in &shape.properties {
                let values = focus_values(data, &shape.target_class, Some(&property.path))?;
                for (focus, values) in &values {
                    check_property(shape, property, focus, values, outcome);
                }

                if let Some(class) = &property.class {
                    for (focus, value) in values_outside_class(data, shape, property, class)? {
                        report(
                            shape,
                            property,
                            outcome,
                            &focus,
                            "sh:class",
                            format!("Value {value} must be an instance of <{class}>"),
                        );
                    }
                }
            }
        }
        Ok(())
    }

    fn load_shapes(store: &Store, outcome: &mut SchemaValidationOutcome) -> Result<Vec<NodeShape>> {
        let query = format!(
            r#"PREFIX sh: <{SH_NS}>
            SELECT ?shape ?target ?severity ?shapeMessage ?prop ?path ?minCount ?maxCount
                   ?datatype ?class ?pattern ?nodeKind ?message ?propSeverity
            WHERE {{
                ?shape sh:targetClass ?target .
                OPTIONAL {{ ?shape sh:severity ?severity }}
                OPTIONAL {{ ?shape sh:message ?shapeMessage }}
                OPTIONAL {{
                    ?shape sh:property ?prop .
                    ?prop sh:path ?path .
                    OPTIONAL {{ ?prop sh:minCount ?minCount }}
                    OPTIONAL {{ ?prop sh:maxCount ?maxCount }}
                    OPTIONAL {{ ?prop sh:datatype ?datatype }}
                    OPTIONAL {{ ?prop sh:class ?class }}
                    OPTIONAL {{ ?prop sh:pattern ?pattern }}
                    OPTIONAL {{ ?prop sh:nodeKind ?nodeKind }}
                    OPTIONAL {{ ?prop sh:message ?message }}
                    OPTIONAL {{ ?prop sh:severity ?propSeverity }}
                }}
            }}"#
        );

        let mut shapes: IndexMap<(String, String), NodeShape> = IndexMap::new();
        let mut seen_props = std::collections::HashSet::new();

        for row in select(store, &query)? {
            let (Some(shape_id), Some(target)) =
                (row.get("shape"), row.get("target").and_then(term_iri))
            else {
                continue;
            };
            let key = (shape_id.to_string(), target.to_string());
            let shape = shapes.entry(key.clone()).or_insert_with(|| NodeShape {
                id: shape_id.to_string(),
                target_class: target.to_string(),
                severity: Severity::from_term(row.get("severity")).unwrap_or(Severity::Violation),
                message: row.get("shapeMessage").and_then(literal_value),
                properties: Vec::new(),
            });

            let Some(prop) = row.get("prop") else {
                continue;
            };
            // OPTIONAL joins repeat rows for multi-valued constraints
            if !seen_props.insert((key, prop.to_string())) {
                continue;
            }

            let Some(path) = row.get("path").and_then(term_iri) else {
                outcome.warning(format!(
                    "Shape {}: complex property paths are not supported, property skipped",
                    shape.id
                ));
                continue;
            };

            let pattern = match row.get("pattern").and_then(literal_value) {
                Some(source) => match Regex::new(&source) {
                    Ok(regex) => Some(regex),
                    Err(e) => {
                        outcome.warning(format!(
                            "Shape {}: invalid sh:pattern '{source}': {e}",
                            shape.id
                        ));
                        None
                    }
                },
                None => None,
            };

            shape.properties.push(PropertyShape {
                path: path.to_string(),
                min_count: row.get("minCount").and_then(literal_count),
                max_count: row.get("maxCount").and_then(literal_count),
                datatype: row.get("datatype").and_then(term_iri).map(str::to_string),
                class: row.get("class").and_then(term_iri).map(str::to_string),
                pattern,
                node_kind: NodeKind::from_term(row.get("nodeKind")),
                message: row.get("message").and_then(literal_value),
                severity: Severity::from_term(row.get("propSeverity")),
            });
        }

        Ok(shapes.into_values().collect())
    }

    /// Focus nodes of `target_class` (including subclasses) with the values
    /// they carry for `path`
    fn focus_values(
        store: &Store,
        target_class: &str,
        path: Option<&str>,
    ) -> Result<IndexMap<String, Vec<Term>>> {
        let (variables, value_pattern) = match path {
            Some(p) => ("?focus ?value", format!("OPTIONAL {{ ?focus <{p}> ?value }}")),
            None => ("?focus", String::new()),
        };
        let query = format!(
            "SELECT DISTINCT {variables} WHERE {{ \
               ?focus <{RDF_TYPE}>/<{RDFS_SUBCLASS}>* <{target_class}> . \
               {value_pattern} \
             }}"
        );

        let mut grouped: IndexMap<String, Vec<Term>> = IndexMap::new();
        for row in select(store, &query)? {
            let Some(focus) = row.get("focus") else {
                continue;
            };
            let values = grouped.entry(focus.to_string()).or_default();
            if let Some(value) = row.get("value") {
                if !values.contains(value) {
                    values.push(value.clone());
                }
            }
        }
        Ok(grouped)
    }

    fn values_outside_class(
        store: &Store,
        shape: &NodeShape,
        property: &PropertyShape,
        class: &str,
    ) -> Result<Vec<(String, String)>> {
        let query = format!(
            "SELECT DISTINCT ?focus ?value WHERE {{ \
               ?focus <{RDF_TYPE}>/<{RDFS_SUBCLASS}>* <{target}> . \
               ?focus <{path}> ?value . \
               FILTER NOT EXISTS {{ ?value <{RDF_TYPE}>/<{RDFS_SUBCLASS}>* <{class}> }} \
             }}",
            target = shape.target_class,
            path = property.path,
        );

        Ok(select(store, &query)?
            .into_iter()
            .filter_map(|row| {
                Some((row.get("focus")?.to_string(), row.get("value")?.to_string()))
            })
            .collect())
    }

    fn check_property(
        shape: &NodeShape,
        property: &PropertyShape,
        focus: &str,
        values: &[Term],
        outcome: &mut SchemaValidationOutcome,
    ) {
        if let Some(min) = property.min_count {
            if values.len() < min {
                report(
                    shape,
                    property,
                    outcome,
                    focus,
                    "sh:minCount",
                    format!("Property must have at least {min} value(s), found {}", values.len()),
                );
            }
        }
        if let Some(max) = property.max_count {
            if values.len() > max {
                report(
                    shape,
                    property,
                    outcome,
                    focus,
                    "sh:maxCount",
                    format!("Property must have at most {max} value(s), found {}", values.len()),
                );
            }
        }

        for value in values {
            if let Some(expected) = &property.datatype {
                let matches = match value {
                    Term::Literal(lit) => lit.datatype().as_str() == expected,
                    _ => false,
                };
                if !matches {
                    report(
                        shape,
                        property,
                        outcome,
                        focus,
                        "sh:datatype",
                        format!("Value {value} must have datatype <{expected}>"),
                    );
                }
            }

            if let Some(kind) = property.node_kind {
                if !kind.accepts(value) {
                    report(
                        shape,
                        property,
                        outcome,
                        focus,
                        "sh:nodeKind",
                        format!("Value {value} has the wrong node kind ({kind:?} expected)"),
                    );
                }
            }

            if let Some(pattern) = &property.pattern {
                let text = match value {
                    Term::Literal(lit) => Some(lit.value().to_string()),
                    Term::NamedNode(node) => Some(node.as_str().to_string()),
                    _ => None,
                };
                if !text.is_some_and(|t| pattern.is_match(&t)) {
                    report(
                        shape,
                        property,
                        outcome,
                        focus,
                        "sh:pattern",
                        format!("Value {value} must match pattern '{}'", pattern.as_str()),
                    );
                }
            }
        }
    }

    fn report(
        shape: &NodeShape,
        property: &PropertyShape,
        outcome: &mut SchemaValidationOutcome,
        focus: &str,
        constraint: &str,
        default_message: String,
    ) {
        let message = property
            .message
            .as_ref()
            .or(shape.message.as_ref())
            .cloned()
            .unwrap_or(default_message);
        let line = format!("{focus} <{}>: {message} ({constraint})", property.path);

        match property.severity.unwrap_or(shape.severity) {
            Severity::Violation => outcome.violation(line),
            Severity::Warning | Severity::Info => outcome.warning(line),
        }
    }

    fn select(store: &Store, query: &str) -> Result<Vec<QuerySolution>> {
        match store
            .query(query)
            .map_err(|e| anyhow!("SPARQL query failed: {e}"))?
        {
            QueryResults::Solutions(solutions) => solutions
                .map(|solution| solution.map_err(|e| anyhow!("Solution error: {e}")))
                .collect(),
            _ => Ok(Vec::new()),
        }
    }

    fn term_iri(term: &Term) -> Option<&str> {
        match term {
            Term::NamedNode(node) => Some(node.as_str()),
            _ => None,
        }
    }

    fn literal_value(term: &Term) -> Option<String> {
        match term {
            Term::Literal(lit) => Some(lit.value().to_string()),
            _ => None,
        }
    }

    fn literal_count(term: &Term) -> Option<usize> {
        match term {
            Term::Literal(lit) => lit.value().parse().ok(),
            _ => None,
        }
    }
}
