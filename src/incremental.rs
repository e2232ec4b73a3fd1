//! Content-hash cache for skipping unchanged transformations
//!
//! State lives in `<output_root>/.ggen-incremental/state.json`. The cache is
//! advisory: a missing or corrupt file only means everything is regenerated.

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

pub const STATE_DIR: &str = ".ggen-incremental";
const STATE_FILE: &str = "state.json";
const HASH_CHUNK_SIZE: usize = 8192;

/// Hash record for one tracked file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHashRecord {
    pub path: String,
    /// Lowercase hex SHA-256 of the file bytes
    pub hash: String,
    pub size: u64,
    pub timestamp: DateTime<Utc>,
}

impl FileHashRecord {
    pub fn compute(path: &Path) -> SyncResult<Self> {
        let (hash, size) = hash_file(path)?;
        Ok(Self {
            path: path_key(path),
            hash,
            size,
            timestamp: Utc::now(),
        })
    }
}

/// Persisted cache contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementalState {
    pub last_sync: Option<DateTime<Utc>>,
    #[serde(default)]
    pub input_hashes: BTreeMap<String, FileHashRecord>,
    #[serde(default)]
    pub output_files: BTreeMap<String, Vec<String>>,
}

/// Tracks input hashes and produced outputs for one output root
#[derive(Debug)]
pub struct IncrementalTracker {
    state_dir: PathBuf,
    state: IncrementalState,
}

impl IncrementalTracker {
    /// Load existing state; anything unreadable starts from empty
    pub fn open(output_root: &Path) -> Self {
        let state_dir = output_root.join(STATE_DIR);
        let state_file = state_dir.join(STATE_FILE);

        let state = match fs::read_to_string(&state_file) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!(
                        path = %state_file.display(),
                        error = %e,
                        "incremental state is corrupt, starting fresh"
                    );
                    IncrementalState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => IncrementalState::default(),
            Err(e) => {
                tracing::warn!(
                    path = %state_file.display(),
                    error = %e,
                    "incremental state unreadable, starting fresh"
                );
                IncrementalState::default()
            }
        };

        Self { state_dir, state }
    }

    pub fn state(&self) -> &IncrementalState {
        &self.state
    }

    /// True if any path is missing, untracked or changed since it was recorded
    pub fn needs_update<P: AsRef<Path>>(&self, paths: &[P]) -> bool {
        if paths.is_empty() || self.state.input_hashes.is_empty() {
            return true;
        }

        paths.iter().any(|path| {
            let path = path.as_ref();
            let Some(record) = self.state.input_hashes.get(&path_key(path)) else {
                return true;
            };
            match hash_file(path) {
                Ok((hash, _)) => hash != record.hash,
                Err(_) => true,
            }
        })
    }

    /// Compute and store a fresh hash for `path`
    pub fn record_input(&mut self, path: &Path) -> SyncResult<()> {
        let record = FileHashRecord::compute(path)?;
        self.state.input_hashes.insert(record.path.clone(), record);
        Ok(())
    }

    /// Associate a transformation with the outputs it produced
    pub fn record_outputs<P: AsRef<Path>>(&mut self, transformation: &str, outputs: &[P]) {
        self.state.output_files.insert(
            transformation.to_string(),
            outputs.iter().map(|p| path_key(p.as_ref())).collect(),
        );
    }

    /// True if the outputs recorded for `transformation` are exactly
    /// `expected` and all of them still exist.
    ///
    /// A renamed or added output therefore forces regeneration even when no
    /// input changed.
    pub fn outputs_current<P: AsRef<Path>>(&self, transformation: &str, expected: &[P]) -> bool {
        let Some(recorded) = self.state.output_files.get(transformation) else {
            return false;
        };
        if expected.is_empty() || recorded.len() != expected.len() {
            return false;
        }
        expected.iter().all(|p| {
            let key = path_key(p.as_ref());
            recorded.contains(&key) && p.as_ref().exists()
        })
    }

    /// Drop records for vanished inputs and deleted outputs.
    ///
    /// Returns how many input records were removed.
    pub fn cleanup_stale(&mut self) -> usize {
        let before = self.state.input_hashes.len();
        self.state
            .input_hashes
            .retain(|path, _| Path::new(path).exists());
        let removed = before - self.state.input_hashes.len();

        self.state.output_files.retain(|_, outputs| {
            outputs.retain(|p| Path::new(p).exists());
            !outputs.is_empty()
        });

        if removed > 0 {
            tracing::debug!(removed, "pruned stale incremental records");
        }
        removed
    }

    /// Persist state via temp file + rename
    pub fn save(&mut self) -> SyncResult<()> {
        self.state.last_sync = Some(Utc::now());

        fs::create_dir_all(&self.state_dir).map_err(|e| SyncError::io(&self.state_dir, e))?;
        let target = self.state_dir.join(STATE_FILE);
        let temp = self.state_dir.join(format!("{STATE_FILE}.tmp"));

        let json = serde_json::to_vec_pretty(&self.state)
            .map_err(|e| SyncError::io(&target, std::io::Error::other(e)))?;
        fs::write(&temp, json).map_err(|e| SyncError::io(&temp, e))?;
        fs::rename(&temp, &target).map_err(|e| SyncError::io(&target, e))?;
        Ok(())
    }
}

/// Streaming SHA-256 of a file in 8 KiB chunks; returns `(hex, size)`
pub fn hash_file(path: &Path) -> SyncResult<(String, u64)> {
    let mut file = File::open(path).map_err(|e| SyncError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; HASH_CHUNK_SIZE];
    let mut size = 0u64;

    loop {
        let read = file.read(&mut buffer).map_err(|e| SyncError::io(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        size += read as u64;
    }

    Ok((format!("{:x}", hasher.finalize()), size))
}

/// SHA-256 of in-memory content, matching [`hash_file`]
pub fn hash_bytes(content: &[u8]) -> String {
    format!("{:x}", Sha256::digest(content))
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_then_modify() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.ttl");
        fs::write(&input, "ex:a a ex:Thing .").unwrap();

        let mut tracker = IncrementalTracker::open(dir.path());
        assert!(tracker.needs_update(&[&input]));

        tracker.record_input(&input).unwrap();
        assert!(!tracker.needs_update(&[&input]));

        fs::write(&input, "ex:a a ex:Thing ,").unwrap();
        assert!(tracker.needs_update(&[&input]));
    }

    #[test]
    fn untracked_or_missing_paths_need_update() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.ttl");
        let b = dir.path().join("b.ttl");
        fs::write(&a, "a").unwrap();
        fs::write(&b, "b").unwrap();

        let mut tracker = IncrementalTracker::open(dir.path());
        tracker.record_input(&a).unwrap();
        assert!(tracker.needs_update(&[&a, &b]));

        fs::remove_file(&a).unwrap();
        assert!(tracker.needs_update(&[&a]));
    }

    #[test]
    fn state_survives_save_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("a.ttl");
        let output = dir.path().join("spec.md");
        fs::write(&input, "content").unwrap();
        fs::write(&output, "# Spec").unwrap();

        let mut tracker = IncrementalTracker::open(dir.path());
        tracker.record_input(&input).unwrap();
        tracker.record_outputs("spec", &[&output]);
        tracker.save().unwrap();

        let reopened = IncrementalTracker::open(dir.path());
        assert!(!reopened.needs_update(&[&input]));
        assert!(reopened.outputs_current("spec", &[&output]));
        assert!(reopened.state().last_sync.is_some());
        assert!(!dir.path().join(STATE_DIR).join("state.json.tmp").exists());
    }

    #[test]
    fn renamed_output_is_not_current() {
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.md");
        let new = dir.path().join("new.md");
        fs::write(&old, "# Old").unwrap();
        fs::write(&new, "# New").unwrap();

        let mut tracker = IncrementalTracker::open(dir.path());
        tracker.record_outputs("spec", &[&old]);

        assert!(tracker.outputs_current("spec", &[&old]));
        // exists on disk but was never produced by this transformation
        assert!(!tracker.outputs_current("spec", &[&new]));
        assert!(!tracker.outputs_current("spec", &[&old, &new]));
        assert!(!tracker.outputs_current::<&Path>("spec", &[]));
        assert!(!tracker.outputs_current("other", &[&old]));
    }

    #[test]
    fn corrupt_state_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(STATE_DIR)).unwrap();
        fs::write(dir.path().join(STATE_DIR).join(STATE_FILE), "{not json").unwrap();

        let tracker = IncrementalTracker::open(dir.path());
        assert_eq!(tracker.state(), &IncrementalState::default());
    }

    #[test]
    fn cleanup_prunes_vanished_files() {
        let dir = tempfile::tempdir().unwrap();
        let keep = dir.path().join("keep.ttl");
        let gone = dir.path().join("gone.ttl");
        let out = dir.path().join("out.md");
        fs::write(&keep, "k").unwrap();
        fs::write(&gone, "g").unwrap();
        fs::write(&out, "o").unwrap();

        let mut tracker = IncrementalTracker::open(dir.path());
        tracker.record_input(&keep).unwrap();
        tracker.record_input(&gone).unwrap();
        tracker.record_outputs("t", &[&out]);

        fs::remove_file(&gone).unwrap();
        fs::remove_file(&out).unwrap();

        assert_eq!(tracker.cleanup_stale(), 1);
        assert_eq!(tracker.state().input_hashes.len(), 1);
        assert!(tracker.state().output_files.is_empty());
        assert!(!tracker.outputs_current("t", &[&out]));
    }

    #[test]
    fn hashing_is_chunk_independent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let content: Vec<u8> = (0..(HASH_CHUNK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &content).unwrap();

        let (hash, size) = hash_file(&path).unwrap();
        assert_eq!(size, content.len() as u64);
        assert_eq!(hash, hash_bytes(&content));
        assert_eq!(hash.len(), 64);
    }
}
