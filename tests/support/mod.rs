#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use ggen_sync::engine::GenerationEngine;
use ggen_sync::{SyncConfig, SyncContext, TransformationSpec};
use tempfile::{TempDir, tempdir};

/// A project directory with a manifest, inputs and an output root
pub struct TestProject {
    _tempdir: TempDir,
    root: PathBuf,
}

impl TestProject {
    pub fn new() -> Self {
        let tempdir = tempdir().expect("tempdir");
        let root = tempdir.path().to_path_buf();
        Self {
            _tempdir: tempdir,
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn output_root(&self) -> PathBuf {
        self.root.join("out")
    }

    pub fn output(&self, name: &str) -> PathBuf {
        self.output_root().join(name)
    }

    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create dir");
        }
        fs::write(&path, content).expect("write file");
        path
    }

    pub fn manifest(&self, content: &str) -> PathBuf {
        self.write("ggen.toml", content)
    }

    /// Config writing into `<project>/out`, with short lock timeouts
    pub fn config(&self) -> SyncConfig {
        let mut config = SyncConfig::new(self.path("ggen.toml"));
        config.output_root = self.output_root();
        config.lock_timeout = Duration::from_millis(300);
        config
    }

    pub fn context(&self, engine: Arc<dyn GenerationEngine>) -> SyncContext {
        SyncContext::new(self.config(), engine)
    }
}

/// Every file and directory under `dir` except pipeline metadata.
///
/// Files map to their bytes; directories appear with a trailing `/` and no
/// content, so a stray empty directory changes the snapshot.
pub fn snapshot(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    if !dir.exists() {
        return files;
    }
    for entry in walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with(".ggen"))
        .filter_map(Result::ok)
        .filter(|e| e.depth() > 0)
    {
        let relative = entry
            .path()
            .strip_prefix(dir)
            .expect("under dir")
            .to_string_lossy()
            .replace('\\', "/");
        if entry.file_type().is_dir() {
            files.insert(format!("{relative}/"), Vec::new());
        } else if entry.file_type().is_file() {
            files.insert(relative, fs::read(entry.path()).expect("read file"));
        }
    }
    files
}

pub const SIMPLE_TTL: &str = r#"@prefix ex: <http://example.org/> .
@prefix rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#> .

ex:alice a ex:Person ;
    ex:name "Alice" .
"#;

/// Renders a markdown document from the first input file and counts calls
#[derive(Debug, Default)]
pub struct MarkdownEngine {
    calls: AtomicUsize,
}

impl MarkdownEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl GenerationEngine for MarkdownEngine {
    fn generate(&self, spec: &TransformationSpec) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut out = format!("# {}\n\n", spec.name);
        for input in &spec.input_files {
            let content = fs::read_to_string(input)?;
            out.push_str(&format!("```turtle\n{}```\n", content));
        }
        Ok(out)
    }
}

/// Returns fixed content per transformation name
#[derive(Debug, Default)]
pub struct FixedEngine {
    outputs: BTreeMap<String, String>,
    failing: Option<String>,
}

impl FixedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, content: &str) -> Self {
        self.outputs.insert(name.to_string(), content.to_string());
        self
    }

    pub fn failing_on(mut self, name: &str) -> Self {
        self.failing = Some(name.to_string());
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl GenerationEngine for FixedEngine {
    fn generate(&self, spec: &TransformationSpec) -> Result<String> {
        if self.failing.as_deref() == Some(spec.name.as_str()) {
            bail!("template error in {}", spec.name);
        }
        match self.outputs.get(&spec.name) {
            Some(content) => Ok(content.clone()),
            None => Ok(format!("# {}\n", spec.name)),
        }
    }
}
