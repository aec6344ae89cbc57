//! Storage abstraction for object histories.
//!
//! This module defines the [`ObjectHistoryStore`] trait which abstracts over
//! different storage backends (in-memory, SQLite) for persisting per-object
//! diff histories and the set of identifiers awaiting a merge.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::state::ObjectHistoryState;
use crate::error::Result;

/// Whether the pending-update set survives reopening a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingPersistence {
    /// Pending identifiers are persisted and restored.
    #[default]
    Durable,
    /// Pending identifiers are dropped when the store is opened.
    Reset,
}

/// Trait for object history storage backends.
///
/// The store keeps, per identifier, the timestamp-ordered diff log and its
/// processing state, plus the set of identifiers whose history changed since
/// the last merge.
pub trait ObjectHistoryStore: Send {
    /// Identifiers whose history changed since their last merge.
    fn pending_updates(&self) -> Result<BTreeSet<String>>;

    /// Mark `identifier` as awaiting a merge.
    fn insert_pending_update(&mut self, identifier: &str) -> Result<()>;

    /// Clear the pending mark of `identifier`.
    fn remove_pending_update(&mut self, identifier: &str) -> Result<()>;

    /// History of `identifier`, if any diff was seen for it.
    fn history_for(&self, identifier: &str) -> Result<Option<ObjectHistoryState>>;

    /// Store `state` as the history of `identifier`, replacing the old one.
    fn update(&mut self, state: ObjectHistoryState, identifier: &str) -> Result<()>;

    /// Persist the store to `location`.
    fn save(&self, location: &Path) -> Result<()>;
}

impl<T: ObjectHistoryStore + ?Sized> ObjectHistoryStore for Box<T> {
    fn pending_updates(&self) -> Result<BTreeSet<String>> {
        (**self).pending_updates()
    }

    fn insert_pending_update(&mut self, identifier: &str) -> Result<()> {
        (**self).insert_pending_update(identifier)
    }

    fn remove_pending_update(&mut self, identifier: &str) -> Result<()> {
        (**self).remove_pending_update(identifier)
    }

    fn history_for(&self, identifier: &str) -> Result<Option<ObjectHistoryState>> {
        (**self).history_for(identifier)
    }

    fn update(&mut self, state: ObjectHistoryState, identifier: &str) -> Result<()> {
        (**self).update(state, identifier)
    }

    fn save(&self, location: &Path) -> Result<()> {
        (**self).save(location)
    }
}
