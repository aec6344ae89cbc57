//! Per-object history state.

use serde::{Deserialize, Serialize};

use crate::model::ObjectDiff;

/// How the next merge has to treat an object's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProcessingState {
    /// Diffs `[0, next_index)` are already applied to the materialized object;
    /// only the rest needs applying.
    FastForward {
        /// Index of the first diff not applied yet
        next_index: usize,
    },
    /// The history was rewritten; the whole sequence must be replayed.
    Replay,
}

/// Ordered diff log for one identifier plus its processing state.
///
/// `diffs` is sorted by timestamp, ascending, and never empty. The history is
/// only actionable once its first diff is an insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectHistoryState {
    /// Merge strategy for the next `process`
    pub processing_state: ProcessingState,
    /// Diffs sorted by timestamp
    pub diffs: Vec<ObjectDiff>,
}

impl ObjectHistoryState {
    /// A fresh history holding one diff, to be replayed on the next merge.
    pub fn new(diff: ObjectDiff) -> Self {
        Self {
            processing_state: ProcessingState::Replay,
            diffs: vec![diff],
        }
    }

    /// Whether the history starts with an insert and can be materialized.
    pub fn is_actionable(&self) -> bool {
        self.diffs.first().is_some_and(ObjectDiff::is_insert)
    }
}
