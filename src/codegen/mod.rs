//! Generated-artifact handling
//!
//! ```text
//! engine output → OutputValidator → AtomicWriter::write (staged) → AtomicWriter::commit
//! ```
//!
//! - **validation**: per-kind syntax checks gating the commit
//! - **atomic**: staging directory, commit journal and rollback

pub mod atomic;
pub mod validation;

pub use atomic::{
    AtomicWriter, FileStatus, InterruptedCommit, STAGING_DIR, StagedFile, TransactionGuard,
    TransactionManifest, TxStatus,
};
pub use validation::{OutputKind, OutputValidator};
