//! Persistent sync bookkeeping of one replica.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::utils::{read_optional, write_file_atomically};

/// What a replica remembers between sync rounds.
///
/// Byte offsets only move forward after the diffs read up to them were
/// merged, so a crash replays at most the unacknowledged tail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalManagerState {
    /// Version of the state format
    pub version: u32,

    /// Identifier of this replica's own journal
    pub local_identifier: String,

    /// Committed read offset per journal
    #[serde(default)]
    pub journal_byte_offsets: BTreeMap<String, u64>,

    /// Version token of the local copy of each remote journal
    #[serde(default)]
    pub remote_file_versions: BTreeMap<String, String>,

    /// Version token returned by the last successful push
    #[serde(default)]
    pub last_local_version_pushed: Option<String>,

    /// Size of the local journal at the last successful push
    #[serde(default)]
    pub last_local_size_pushed: Option<u64>,
}

impl JournalManagerState {
    /// Current state format version
    pub const CURRENT_VERSION: u32 = 1;

    /// Fresh state for a replica whose journal is `local_identifier`.
    pub fn new(local_identifier: impl Into<String>) -> Self {
        let local_identifier = local_identifier.into();
        let mut journal_byte_offsets = BTreeMap::new();
        journal_byte_offsets.insert(local_identifier.clone(), 0);
        Self {
            version: Self::CURRENT_VERSION,
            local_identifier,
            journal_byte_offsets,
            remote_file_versions: BTreeMap::new(),
            last_local_version_pushed: None,
            last_local_size_pushed: None,
        }
    }

    /// Load the state saved at `path`, or `None` if there is none.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match read_optional(path)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Save the state to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_file_atomically(path, &serde_json::to_vec_pretty(self)?)
    }

    /// Sum of the committed offsets over every journal.
    pub fn bytes_consumed(&self) -> u64 {
        self.journal_byte_offsets.values().sum()
    }
}
