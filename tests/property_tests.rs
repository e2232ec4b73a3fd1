//! Property-based tests
//!
//! - path safety: clean relative paths pass, any `..` segment fails
//! - hashing: streaming and in-memory SHA-256 agree across chunk boundaries
//! - incremental tracking: a recorded file is current until its bytes change
//! - transformation states: terminal states never move again

use ggen_sync::codegen::AtomicWriter;
use ggen_sync::incremental::{IncrementalTracker, hash_bytes, hash_file};
use ggen_sync::sync::TransformState;
use ggen_sync::validation::validate_path_safe;
use proptest::prelude::*;
use std::fs;

// =============================================================================
// Generators
// =============================================================================

fn segment() -> impl Strategy<Value = String> {
    "[a-z0-9_-]{1,8}(\\.[a-z]{1,3})?"
}

fn relative_path() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(segment(), 1..5)
}

fn any_state() -> impl Strategy<Value = TransformState> {
    prop_oneof![
        Just(TransformState::Pending),
        Just(TransformState::Checked),
        Just(TransformState::Skipped),
        Just(TransformState::Generated),
        Just(TransformState::Validated),
        Just(TransformState::Staged),
        Just(TransformState::Committed),
        Just(TransformState::Failed),
    ]
}

// =============================================================================
// Path safety
// =============================================================================

proptest! {
    #[test]
    fn clean_relative_paths_are_accepted(segments in relative_path()) {
        let path = segments.join("/");
        prop_assert!(validate_path_safe(&path).is_ok(), "{path} rejected");
    }

    #[test]
    fn any_parent_segment_is_rejected(
        segments in relative_path(),
        position in any::<prop::sample::Index>(),
    ) {
        let mut segments = segments;
        let at = position.index(segments.len() + 1);
        segments.insert(at, "..".to_string());
        let path = segments.join("/");
        prop_assert!(validate_path_safe(&path).is_err(), "{path} accepted");
    }

    #[test]
    fn absolute_paths_are_rejected(segments in relative_path()) {
        let path = format!("/{}", segments.join("/"));
        prop_assert!(validate_path_safe(&path).is_err());
    }

    #[test]
    fn writer_stages_nothing_for_traversal(segments in relative_path()) {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = AtomicWriter::begin(dir.path()).unwrap();
        let path = format!("../{}", segments.join("/"));
        prop_assert!(writer.write(&path, "x").is_err());
        prop_assert_eq!(writer.staged_files().count(), 0);
    }
}

// =============================================================================
// Hashing and incremental tracking
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn file_hash_matches_in_memory_hash(content in prop::collection::vec(any::<u8>(), 0..20_000)) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.bin");
        fs::write(&path, &content).unwrap();

        let (hash, size) = hash_file(&path).unwrap();
        prop_assert_eq!(size, content.len() as u64);
        prop_assert_eq!(hash.len(), 64);
        prop_assert!(hash.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        prop_assert_eq!(hash, hash_bytes(&content));
    }

    #[test]
    fn recorded_input_is_current_until_changed(
        content in prop::collection::vec(any::<u8>(), 0..4_096),
        extra in any::<u8>(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("schema.ttl");
        fs::write(&input, &content).unwrap();

        let mut tracker = IncrementalTracker::open(dir.path());
        prop_assert!(tracker.needs_update(&[&input]));
        tracker.record_input(&input).unwrap();
        prop_assert!(!tracker.needs_update(&[&input]));

        // state survives a save and reopen
        tracker.save().unwrap();
        let reopened = IncrementalTracker::open(dir.path());
        prop_assert!(!reopened.needs_update(&[&input]));

        let mut changed = content.clone();
        changed.push(extra);
        fs::write(&input, &changed).unwrap();
        prop_assert!(reopened.needs_update(&[&input]));
    }
}

// =============================================================================
// Transformation states
// =============================================================================

proptest! {
    #[test]
    fn terminal_states_never_move(from in any_state(), to in any_state()) {
        let mut state = from;
        let result = state.advance(to);
        if from.is_terminal() {
            prop_assert!(result.is_err());
            prop_assert_eq!(state, from);
        }
        if result.is_err() {
            prop_assert_eq!(state, from);
        } else {
            prop_assert_eq!(state, to);
        }
    }

    #[test]
    fn every_live_state_can_fail(from in any_state()) {
        prop_assert_eq!(from.can_transition_to(TransformState::Failed), !from.is_terminal());
    }
}
