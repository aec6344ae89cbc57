//! The merge engine.
//!
//! [`ObjectHistoryTracker`] keeps every incoming diff in the timestamp-ordered
//! history of its object, and [`ObjectHistoryTracker::process`] turns the
//! histories that changed into a [`MergeResult`] against the materialized
//! object set.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::state::{ObjectHistoryState, ProcessingState};
use super::store::ObjectHistoryStore;
use crate::error::Result;
use crate::model::{DatabaseObject, ObjectDiff};

/// Changes to apply to the object set after a merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeResult {
    /// Objects that did not exist before
    pub inserted: BTreeMap<String, DatabaseObject>,
    /// New state of objects that existed before
    pub updated: BTreeMap<String, DatabaseObject>,
    /// Identifiers of objects that no longer exist
    pub removed: BTreeSet<String>,
}

impl MergeResult {
    /// Whether the merge changed nothing.
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Number of identifiers touched.
    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.removed.len()
    }
}

/// Outcome of placing one diff into a history.
enum Placement {
    /// The identical diff was already present
    Duplicate,
    /// Appended after every existing diff
    Appended,
    /// Inserted before later diffs; the history was rewritten
    Rewritten,
}

/// Insert `diff` into `diffs`, keeping timestamp order.
fn place(diffs: &mut Vec<ObjectDiff>, diff: ObjectDiff) -> Placement {
    let timestamp = diff.timestamp();
    let first_same = diffs.partition_point(|d| d.timestamp() < timestamp);
    let first_later =
        first_same + diffs[first_same..].partition_point(|d| d.timestamp() == timestamp);

    if diffs[first_same..first_later].contains(&diff) {
        return Placement::Duplicate;
    }
    if first_later == diffs.len() {
        diffs.push(diff);
        Placement::Appended
    } else {
        diffs.insert(first_later, diff);
        Placement::Rewritten
    }
}

/// Tracks per-object diff histories and merges them into objects.
#[derive(Debug)]
pub struct ObjectHistoryTracker<S> {
    store: S,
}

impl<S: ObjectHistoryStore> ObjectHistoryTracker<S> {
    /// Track histories in `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The underlying history store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// History of one identifier.
    pub fn history_for(&self, identifier: &str) -> Result<Option<ObjectHistoryState>> {
        self.store.history_for(identifier)
    }

    /// Identifiers that the next [`process`](Self::process) will merge.
    pub fn pending(&self) -> Result<BTreeSet<String>> {
        self.store.pending_updates()
    }

    /// Fold `diffs` into their histories.
    ///
    /// Diffs may arrive in any order and more than once; a diff equal to one
    /// already stored is ignored. Returns the number of diffs that changed a
    /// history.
    pub fn enqueue(&mut self, diffs: impl IntoIterator<Item = ObjectDiff>) -> Result<usize> {
        // Touched histories and whether any diff changed them.
        let mut touched: HashMap<String, (ObjectHistoryState, bool)> = HashMap::new();
        let mut accepted = 0;

        for diff in diffs {
            let identifier = diff.identifier().to_string();
            let state = match touched.remove(&identifier) {
                Some(entry) => Some(entry),
                None => self.store.history_for(&identifier)?.map(|state| (state, false)),
            };

            let entry = match state {
                None => {
                    accepted += 1;
                    (ObjectHistoryState::new(diff), true)
                }
                Some((mut state, changed)) => match place(&mut state.diffs, diff) {
                    Placement::Duplicate => (state, changed),
                    Placement::Appended => {
                        accepted += 1;
                        (state, true)
                    }
                    Placement::Rewritten => {
                        accepted += 1;
                        state.processing_state = ProcessingState::Replay;
                        (state, true)
                    }
                },
            };
            touched.insert(identifier, entry);
        }

        for (identifier, (state, changed)) in touched {
            if !changed {
                continue;
            }
            let actionable = state.is_actionable();
            self.store.update(state, &identifier)?;
            if actionable {
                self.store.insert_pending_update(&identifier)?;
            }
        }

        log::debug!("Enqueued {} new diffs", accepted);
        Ok(accepted)
    }

    /// Merge every pending history.
    ///
    /// `current` returns the materialized object for an identifier, if one
    /// exists. Each merged history moves to `FastForward(len)` and leaves the
    /// pending set. Running `process` again without new diffs yields an empty
    /// result.
    pub fn process<F>(&mut self, mut current: F) -> Result<MergeResult>
    where
        F: FnMut(&str) -> Result<Option<DatabaseObject>>,
    {
        let mut result = MergeResult::default();

        for identifier in self.store.pending_updates()? {
            let Some(mut state) = self.store.history_for(&identifier)? else {
                self.store.remove_pending_update(&identifier)?;
                continue;
            };
            if !state.is_actionable() {
                self.store.remove_pending_update(&identifier)?;
                continue;
            }

            let base = current(&identifier)?;
            match (state.processing_state, base) {
                (ProcessingState::FastForward { next_index }, Some(base)) => {
                    let tail = state.diffs.get(next_index..).unwrap_or_default();
                    match DatabaseObject::update_from(Some(base), tail) {
                        Some(object) => {
                            result.updated.insert(identifier.clone(), object);
                        }
                        None => {
                            result.removed.insert(identifier.clone());
                        }
                    }
                }
                (ProcessingState::FastForward { next_index }, None) => {
                    let prefix = state.diffs.get(..next_index).unwrap_or(&state.diffs[..]);
                    if DatabaseObject::create_from(prefix).is_some() {
                        log::warn!(
                            "'{}' is fast-forward at {} but has no object, replaying next merge",
                            identifier,
                            next_index
                        );
                        state.processing_state = ProcessingState::Replay;
                        self.store.update(state, &identifier)?;
                        continue;
                    }
                    if let Some(object) = DatabaseObject::create_from(&state.diffs) {
                        result.inserted.insert(identifier.clone(), object);
                    }
                }
                (ProcessingState::Replay, Some(_)) => {
                    match DatabaseObject::create_from(&state.diffs) {
                        Some(object) => {
                            result.updated.insert(identifier.clone(), object);
                        }
                        None => {
                            result.removed.insert(identifier.clone());
                        }
                    }
                }
                (ProcessingState::Replay, None) => {
                    if let Some(object) = DatabaseObject::create_from(&state.diffs) {
                        result.inserted.insert(identifier.clone(), object);
                    }
                }
            }

            state.processing_state = ProcessingState::FastForward {
                next_index: state.diffs.len(),
            };
            self.store.update(state, &identifier)?;
            self.store.remove_pending_update(&identifier)?;
        }

        log::debug!(
            "Merged {} inserted, {} updated, {} removed",
            result.inserted.len(),
            result.updated.len(),
            result.removed.len()
        );
        Ok(result)
    }

    /// Mark `identifiers` pending again with a full replay, for a merge result
    /// that never reached the object store.
    pub fn requeue<'a>(&mut self, identifiers: impl IntoIterator<Item = &'a String>) -> Result<()> {
        for identifier in identifiers {
            let Some(mut state) = self.store.history_for(identifier)? else {
                continue;
            };
            state.processing_state = ProcessingState::Replay;
            self.store.update(state, identifier)?;
            self.store.insert_pending_update(identifier)?;
        }
        Ok(())
    }

    /// Persist the history store to `location`.
    pub fn save(&self, location: &std::path::Path) -> Result<()> {
        self.store.save(location)
    }
}
