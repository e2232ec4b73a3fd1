//! Post-generation syntax checks, run before anything is committed
//!
//! Each artifact kind has one entry point returning a [`ValidationResult`].
//! Errors block the commit of the whole batch; warnings are surfaced but
//! never block.

use crate::validation::ValidationResult;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

/// JSON outputs above this size get a warning
pub const LARGE_JSON_BYTES: usize = 10 * 1024 * 1024;

static HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#{1,6}\s+(.+?)\s*#*\s*$").expect("heading regex"));
static LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\[([^\]]*)\]\(\s*([^)\s]+)(?:\s+"[^"]*")?\s*\)"#).expect("link regex")
});
static PY_WILDCARD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*from\s+\S+\s+import\s+\*").expect("wildcard regex"));

// ============================================================================
// Output kinds
// ============================================================================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OutputKind {
    Markdown,
    Json,
    Yaml,
    Toml,
    Rust,
    Python,
    JavaScript,
    TypeScript,
    /// Other brace-delimited source text (C, Go, Java, ...)
    Source,
    Unknown,
}

impl OutputKind {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "md" | "markdown" => OutputKind::Markdown,
            "json" => OutputKind::Json,
            "yaml" | "yml" => OutputKind::Yaml,
            "toml" => OutputKind::Toml,
            "rs" => OutputKind::Rust,
            "py" | "pyi" => OutputKind::Python,
            "js" | "mjs" | "cjs" | "jsx" => OutputKind::JavaScript,
            "ts" | "tsx" | "mts" | "cts" => OutputKind::TypeScript,
            "c" | "h" | "cc" | "cpp" | "hpp" | "java" | "go" | "cs" | "kt" | "swift" | "scala" => {
                OutputKind::Source
            }
            _ => OutputKind::Unknown,
        }
    }
}

// ============================================================================
// Validator
// ============================================================================

/// Dispatches generated content to the checker for its kind
#[derive(Debug, Clone, Default)]
pub struct OutputValidator {
    /// Outputs of the current batch; markdown links to them are not broken
    pending_outputs: HashSet<PathBuf>,
}

impl OutputValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pending_outputs(mut self, outputs: impl IntoIterator<Item = PathBuf>) -> Self {
        self.pending_outputs = outputs.into_iter().map(|p| lexical_normalize(&p)).collect();
        self
    }

    /// Validate `content` destined for `final_path`
    pub fn validate(&self, final_path: &Path, content: &str) -> ValidationResult {
        let kind = OutputKind::from_path(final_path);
        let result = match kind {
            OutputKind::Markdown => {
                let dir = final_path.parent().unwrap_or_else(|| Path::new(""));
                validate_markdown(content, dir, &self.pending_outputs)
            }
            OutputKind::Json => validate_json(content),
            OutputKind::Yaml => validate_yaml(content),
            OutputKind::Toml => validate_toml(content),
            OutputKind::Rust => validate_rust(content),
            OutputKind::Python => validate_python(content),
            OutputKind::JavaScript | OutputKind::TypeScript => validate_javascript(content),
            OutputKind::Source => validate_source(content),
            OutputKind::Unknown => ValidationResult::new(),
        };

        tracing::debug!(
            output = %final_path.display(),
            kind = %kind,
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "output validated"
        );
        result
    }
}

// ============================================================================
// Markdown
// ============================================================================

/// Fences must pair up; broken relative links and duplicate headings warn.
pub fn validate_markdown(
    content: &str,
    final_dir: &Path,
    pending_outputs: &HashSet<PathBuf>,
) -> ValidationResult {
    let mut result = ValidationResult::new();
    let mut fences = 0usize;
    let mut open_fence_line = 0usize;
    let mut headings: HashSet<String> = HashSet::new();

    for (index, line) in content.lines().enumerate() {
        let line_no = index + 1;
        let trimmed = line.trim_start();

        if trimmed.starts_with("```") {
            fences += 1;
            if fences % 2 == 1 {
                open_fence_line = line_no;
            }
            continue;
        }
        if fences % 2 == 1 {
            continue;
        }

        if let Some(captures) = HEADING_RE.captures(line) {
            let heading = captures[1].to_string();
            if !headings.insert(heading.clone()) {
                result.add_warning(format!("Line {line_no}: Duplicate heading: {heading}"));
            }
        }

        for captures in LINK_RE.captures_iter(line) {
            let target = &captures[2];
            if is_external_link(target) {
                continue;
            }
            let file_part = target.split('#').next().unwrap_or_default();
            if file_part.is_empty() {
                continue;
            }
            let resolved = lexical_normalize(&final_dir.join(file_part));
            if !resolved.exists() && !pending_outputs.contains(&resolved) {
                result.add_warning(format!("Line {line_no}: Broken link: {target}"));
            }
        }
    }

    if fences % 2 == 1 {
        result.add_error(format!(
            "Unclosed code block (odd number of ``` fences, last opened at line {open_fence_line})"
        ));
    }

    result
}

fn is_external_link(target: &str) -> bool {
    target.starts_with('#')
        || target.starts_with('/')
        || target.starts_with("mailto:")
        || target.contains("://")
}

/// Resolve `.` and `..` without touching the filesystem
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

// ============================================================================
// Data formats
// ============================================================================

pub fn validate_json(content: &str) -> ValidationResult {
    let mut result = ValidationResult::new();
    if let Err(e) = serde_json::from_str::<serde_json::Value>(content) {
        result.add_error(format!(
            "JSON parse error at line {}, column {}: {e}",
            e.line(),
            e.column()
        ));
    }
    if content.len() > LARGE_JSON_BYTES {
        result.add_warning(format!(
            "Large JSON file: {:.1}MB",
            content.len() as f64 / (1024.0 * 1024.0)
        ));
    }
    result
}

pub fn validate_yaml(content: &str) -> ValidationResult {
    let mut result = ValidationResult::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        if let Err(e) = serde_yaml::Value::deserialize(document) {
            match e.location() {
                Some(loc) => result.add_error(format!(
                    "YAML parse error at line {}, column {}: {e}",
                    loc.line(),
                    loc.column()
                )),
                None => result.add_error(format!("YAML parse error: {e}")),
            }
            break;
        }
    }
    result
}

pub fn validate_toml(content: &str) -> ValidationResult {
    let mut result = ValidationResult::new();
    if let Err(e) = content.parse::<toml::Table>() {
        let line = e
            .span()
            .map(|span| content[..span.start.min(content.len())].matches('\n').count() + 1);
        match line {
            Some(line) => result.add_error(format!(
                "TOML parse error at line {line}: {}",
                e.message()
            )),
            None => result.add_error(format!("TOML parse error: {}", e.message())),
        }
    }
    result
}

// ============================================================================
// Source code
// ============================================================================

/// Full-grammar parse
pub fn validate_rust(content: &str) -> ValidationResult {
    let mut result = ValidationResult::new();
    if let Err(e) = syn::parse_file(content) {
        let start = e.span().start();
        result.add_error(format!(
            "Rust syntax error at line {}, column {}: {e}",
            start.line,
            start.column + 1
        ));
    }
    result
}

pub fn validate_python(content: &str) -> ValidationResult {
    let mut result = ValidationResult::new();
    scan_source(content, &PYTHON, &mut result);

    for (index, line) in content.lines().enumerate() {
        if PY_WILDCARD_RE.is_match(line) {
            result.add_warning(format!(
                "Line {}: Uses 'import *' (wildcard imports)",
                index + 1
            ));
        }
    }
    result
}

pub fn validate_javascript(content: &str) -> ValidationResult {
    let mut result = ValidationResult::new();
    scan_source(content, &JAVASCRIPT, &mut result);
    result
}

pub fn validate_source(content: &str) -> ValidationResult {
    let mut result = ValidationResult::new();
    scan_source(content, &C_LIKE, &mut result);
    result
}

/// Lexical conventions the delimiter scanner needs to know about
struct Syntax {
    line_comment: &'static str,
    block_comment: Option<(&'static str, &'static str)>,
    /// Quote characters whose literals end at a newline
    quotes: &'static [char],
    /// Quote characters whose literals may span lines
    multiline_quotes: &'static [char],
    triple_quotes: bool,
}

const PYTHON: Syntax = Syntax {
    line_comment: "#",
    block_comment: None,
    quotes: &['\'', '"'],
    multiline_quotes: &[],
    triple_quotes: true,
};

const JAVASCRIPT: Syntax = Syntax {
    line_comment: "//",
    block_comment: Some(("/*", "*/")),
    quotes: &['\'', '"'],
    multiline_quotes: &['`'],
    triple_quotes: false,
};

const C_LIKE: Syntax = Syntax {
    line_comment: "//",
    block_comment: Some(("/*", "*/")),
    quotes: &['"'],
    multiline_quotes: &[],
    triple_quotes: false,
};

struct Cursor {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Cursor {
    fn new(content: &str) -> Self {
        Self {
            chars: content.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn at(&self, token: &str) -> bool {
        token
            .chars()
            .enumerate()
            .all(|(offset, ch)| self.chars.get(self.pos + offset) == Some(&ch))
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn bump_n(&mut self, n: usize) {
        for _ in 0..n {
            self.bump();
        }
    }
}

/// Brace, bracket and paren balance plus unterminated literals, with
/// line:column positions. Comments and string contents are skipped.
fn scan_source(content: &str, syntax: &Syntax, result: &mut ValidationResult) {
    const PAIRS: [(char, char, &str); 3] = [
        ('{', '}', "brace"),
        ('[', ']', "bracket"),
        ('(', ')', "parenthesis"),
    ];
    let mut stacks: [Vec<(usize, usize)>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    let mut cur = Cursor::new(content);

    while let Some(ch) = cur.peek() {
        if cur.at(syntax.line_comment) {
            while cur.peek().is_some_and(|c| c != '\n') {
                cur.bump();
            }
            continue;
        }

        if let Some((open, close)) = syntax.block_comment {
            if cur.at(open) {
                let (line, col) = (cur.line, cur.col);
                cur.bump_n(open.chars().count());
                while cur.peek().is_some() && !cur.at(close) {
                    cur.bump();
                }
                if cur.peek().is_none() {
                    result.add_error(format!("Unterminated block comment at {line}:{col}"));
                }
                cur.bump_n(close.chars().count());
                continue;
            }
        }

        if syntax.triple_quotes && (cur.at("\"\"\"") || cur.at("'''")) {
            let delimiter: String = std::iter::repeat_n(ch, 3).collect();
            let (line, col) = (cur.line, cur.col);
            cur.bump_n(3);
            loop {
                if cur.at(&delimiter) {
                    cur.bump_n(3);
                    break;
                }
                match cur.bump() {
                    None => {
                        result.add_error(format!(
                            "Unterminated triple-quoted string at {line}:{col}"
                        ));
                        break;
                    }
                    Some('\\') => {
                        cur.bump();
                    }
                    Some(_) => {}
                }
            }
            continue;
        }

        if syntax.quotes.contains(&ch) || syntax.multiline_quotes.contains(&ch) {
            let multiline = syntax.multiline_quotes.contains(&ch);
            let (line, col) = (cur.line, cur.col);
            cur.bump();
            loop {
                match cur.peek() {
                    None => {
                        result.add_error(format!("Unterminated string literal at {line}:{col}"));
                        break;
                    }
                    Some('\n') if !multiline => {
                        result.add_error(format!("Unterminated string literal at {line}:{col}"));
                        break;
                    }
                    Some('\\') => {
                        cur.bump_n(2);
                    }
                    Some(c) if c == ch => {
                        cur.bump();
                        break;
                    }
                    Some(_) => {
                        cur.bump();
                    }
                }
            }
            continue;
        }

        for (index, (open, close, name)) in PAIRS.iter().enumerate() {
            if ch == *open {
                stacks[index].push((cur.line, cur.col));
            } else if ch == *close && stacks[index].pop().is_none() {
                result.add_error(format!(
                    "Unmatched closing {name} '{close}' at {}:{}",
                    cur.line, cur.col
                ));
            }
        }
        cur.bump();
    }

    for (index, (open, _, name)) in PAIRS.iter().enumerate() {
        if let Some((line, col)) = stacks[index].first() {
            result.add_error(format!("Unclosed opening {name} '{open}' at {line}:{col}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markdown(content: &str) -> ValidationResult {
        validate_markdown(content, Path::new("/nonexistent/out"), &HashSet::new())
    }

    #[test]
    fn kind_from_extension() {
        assert_eq!(OutputKind::from_path(Path::new("docs/spec.md")), OutputKind::Markdown);
        assert_eq!(OutputKind::from_path(Path::new("a.YML")), OutputKind::Yaml);
        assert_eq!(OutputKind::from_path(Path::new("lib.rs")), OutputKind::Rust);
        assert_eq!(OutputKind::from_path(Path::new("index.tsx")), OutputKind::TypeScript);
        assert_eq!(OutputKind::from_path(Path::new("README")), OutputKind::Unknown);
    }

    #[test]
    fn markdown_unclosed_fence_is_error() {
        let result = markdown("# Title\n\n```rust\nfn main() {}\n");
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("line 3"));

        assert!(markdown("```\ncode\n```\n").is_valid());
    }

    #[test]
    fn markdown_duplicate_headings_and_links_warn() {
        let result = markdown(
            "# Intro\n\nSee [other](other.md), [web](https://example.org) and [top](#intro).\n\n## Intro\n",
        );
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 2, "{:?}", result.warnings);
        assert!(result.warnings[0].contains("Broken link: other.md"));
        assert!(result.warnings[1].contains("Duplicate heading: Intro"));
    }

    #[test]
    fn markdown_ignores_headings_inside_fences() {
        let result = markdown("# A\n\n```sh\n# A\n```\n");
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn markdown_links_to_pending_outputs_are_fine() {
        let dir = tempfile::tempdir().unwrap();
        let pending: HashSet<PathBuf> = [dir.path().join("api.md")].into_iter().collect();
        let docs = dir.path().join("docs");

        let result = validate_markdown("[api](../api.md)\n", &docs, &pending);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn json_error_has_position() {
        let result = validate_json("{\n  \"a\": 1,\n  \"b\": \n}");
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("line 4"), "{}", result.errors[0]);
        assert!(validate_json("{\"a\": [1, 2]}").is_valid());
    }

    #[test]
    fn yaml_and_toml() {
        assert!(validate_yaml("a: 1\n---\nb: [1, 2]\n").is_valid());
        let result = validate_yaml("a: [1, 2\nb: 3\n");
        assert!(!result.is_valid());

        assert!(validate_toml("[package]\nname = \"x\"\n").is_valid());
        let result = validate_toml("[package]\nname = \n");
        assert!(result.errors[0].contains("line 2"), "{}", result.errors[0]);
    }

    #[test]
    fn rust_parse_reports_line() {
        assert!(validate_rust("pub struct Spec { pub name: String }\n").is_valid());
        let result = validate_rust("fn main() {\n    let x = ;\n}\n");
        assert!(result.errors[0].contains("line 2"), "{}", result.errors[0]);
    }

    #[test]
    fn python_heuristics() {
        let result = validate_python("from os import *\n\ndef f(x):\n    return {'a': [x]}  # don't\n");
        assert!(result.is_valid(), "{:?}", result.errors);
        assert_eq!(result.warnings.len(), 1);

        let result = validate_python("def f(:\n    '''doc\n");
        assert_eq!(result.errors.len(), 2, "{:?}", result.errors);
    }

    #[test]
    fn javascript_balance_with_positions() {
        let ok = "// {\nconst s = `multi\n}line`;\nfunction f() { return [1, \"(\"]; }\n";
        assert!(validate_javascript(ok).is_valid());

        let result = validate_javascript("function f() {\n  return 1;\n");
        assert_eq!(result.errors, vec!["Unclosed opening brace '{' at 1:14"]);

        let result = validate_javascript("const a = 'open;\n");
        assert!(result.errors[0].starts_with("Unterminated string literal at 1:11"));
    }

    #[test]
    fn unknown_kind_accepts_anything() {
        let validator = OutputValidator::new();
        assert!(validator.validate(Path::new("notes.txt"), "{{{{").is_valid());
        assert!(!validator.validate(Path::new("x.json"), "{").is_valid());
    }
}
