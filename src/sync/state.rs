//! Per-transformation progress through a run
//!
//! **Valid transitions**:
//! - Pending -> Checked
//! - Checked -> Skipped (incremental hit) | Generated
//! - Generated -> Validated
//! - Validated -> Staged
//! - Staged -> Committed
//! - any non-terminal state -> Failed
//!
//! `Skipped`, `Committed` and `Failed` are terminal.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransformState {
    #[default]
    Pending,
    Checked,
    Skipped,
    Generated,
    Validated,
    Staged,
    Committed,
    Failed,
}

impl TransformState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransformState::Skipped | TransformState::Committed | TransformState::Failed
        )
    }

    pub fn can_transition_to(self, next: TransformState) -> bool {
        use TransformState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Pending, Checked)
            | (Checked, Skipped)
            | (Checked, Generated)
            | (Generated, Validated)
            | (Validated, Staged)
            | (Staged, Committed) => true,
            _ => false,
        }
    }

    /// Move to `next`, refusing edges the state machine does not allow
    pub fn advance(&mut self, next: TransformState) -> SyncResult<()> {
        if !self.can_transition_to(next) {
            return Err(SyncError::InvalidTransition {
                operation: "advance transformation",
                state: format!("{self} (requested {next})"),
            });
        }
        *self = next;
        Ok(())
    }
}
