//! In-memory history store.
//!
//! This provides a simple in-memory implementation of [`ObjectHistoryStore`].
//! It can be snapshotted to a JSON file and loaded back.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::state::ObjectHistoryState;
use super::store::{ObjectHistoryStore, PendingPersistence};
use crate::error::Result;
use crate::utils::{read_optional, write_file_atomically};

/// In-memory object history storage.
#[derive(Debug, Default, Clone)]
pub struct MemoryHistoryStore {
    /// Histories (identifier -> ordered diffs + state)
    histories: HashMap<String, ObjectHistoryState>,

    /// Identifiers awaiting a merge
    pending: BTreeSet<String>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    histories: HashMap<String, ObjectHistoryState>,
    #[serde(default)]
    pending: BTreeSet<String>,
}

impl MemoryHistoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot written by [`ObjectHistoryStore::save`].
    ///
    /// A missing file yields an empty store. With
    /// [`PendingPersistence::Reset`] the pending set is discarded.
    pub fn load(location: &Path, pending: PendingPersistence) -> Result<Self> {
        let Some(bytes) = read_optional(location)? else {
            return Ok(Self::new());
        };
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        Ok(Self {
            histories: snapshot.histories,
            pending: match pending {
                PendingPersistence::Durable => snapshot.pending,
                PendingPersistence::Reset => BTreeSet::new(),
            },
        })
    }

    /// Number of identifiers with a history.
    pub fn len(&self) -> usize {
        self.histories.len()
    }

    /// Whether no history is stored.
    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }
}

impl ObjectHistoryStore for MemoryHistoryStore {
    fn pending_updates(&self) -> Result<BTreeSet<String>> {
        Ok(self.pending.clone())
    }

    fn insert_pending_update(&mut self, identifier: &str) -> Result<()> {
        self.pending.insert(identifier.to_string());
        Ok(())
    }

    fn remove_pending_update(&mut self, identifier: &str) -> Result<()> {
        self.pending.remove(identifier);
        Ok(())
    }

    fn history_for(&self, identifier: &str) -> Result<Option<ObjectHistoryState>> {
        Ok(self.histories.get(identifier).cloned())
    }

    fn update(&mut self, state: ObjectHistoryState, identifier: &str) -> Result<()> {
        self.histories.insert(identifier.to_string(), state);
        Ok(())
    }

    fn save(&self, location: &Path) -> Result<()> {
        let snapshot = Snapshot {
            histories: self.histories.clone(),
            pending: self.pending.clone(),
        };
        write_file_atomically(location, &serde_json::to_vec(&snapshot)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ProcessingState;
    use crate::model::{DatabaseObject, ObjectDiff};

    fn sample_state() -> ObjectHistoryState {
        ObjectHistoryState {
            processing_state: ProcessingState::FastForward { next_index: 1 },
            diffs: vec![ObjectDiff::insert(
                "1",
                DatabaseObject::new("person").with_property("name", "John"),
            )],
        }
    }

    #[test]
    fn test_update_and_history_for() {
        let mut store = MemoryHistoryStore::new();
        assert!(store.history_for("1").unwrap().is_none());

        store.update(sample_state(), "1").unwrap();
        assert_eq!(store.history_for("1").unwrap(), Some(sample_state()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_pending_updates() {
        let mut store = MemoryHistoryStore::new();
        store.insert_pending_update("b").unwrap();
        store.insert_pending_update("a").unwrap();
        store.insert_pending_update("a").unwrap();
        assert_eq!(
            store.pending_updates().unwrap().into_iter().collect::<Vec<_>>(),
            vec!["a", "b"]
        );

        store.remove_pending_update("a").unwrap();
        assert_eq!(store.pending_updates().unwrap().len(), 1);
    }

    #[test]
    fn test_save_and_load_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        let mut store = MemoryHistoryStore::new();
        store.update(sample_state(), "1").unwrap();
        store.insert_pending_update("1").unwrap();
        store.save(&path).unwrap();

        let durable = MemoryHistoryStore::load(&path, PendingPersistence::Durable).unwrap();
        assert_eq!(durable.history_for("1").unwrap(), Some(sample_state()));
        assert!(durable.pending_updates().unwrap().contains("1"));

        let reset = MemoryHistoryStore::load(&path, PendingPersistence::Reset).unwrap();
        assert_eq!(reset.history_for("1").unwrap(), Some(sample_state()));
        assert!(reset.pending_updates().unwrap().is_empty());
    }

    #[test]
    fn test_load_missing_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            MemoryHistoryStore::load(&dir.path().join("none.json"), PendingPersistence::Durable)
                .unwrap();
        assert!(store.is_empty());
    }
}
