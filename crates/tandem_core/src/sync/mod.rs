//! Journal synchronization through a remote file store.
//!
//! # Architecture
//!
//! ```text
//! RemoteFileStore (shared folder, memory, ...)
//!         ↑↓  whole journal files
//!    JournalManager (versions, offsets, push/pull)
//!         ↓   new diffs, offset proposal
//!    Session (enqueue → merge → acknowledge)
//! ```
//!
//! # Key Components
//!
//! - [`RemoteFileStore`] - Where journals are exchanged
//! - [`JournalManager`] - Pushes, pulls and reads journals
//! - [`JournalManagerState`] - Persisted offsets and version tokens

mod journal_manager;
mod remote;
mod state;

pub use journal_manager::{
    FetchOutcome, FetchedBatch, JournalManager, OffsetProposal, PushRequest,
    find_newer_remote_files,
};
pub use remote::{
    BoxFuture, DirectoryRemoteStore, MemoryRemoteStore, RemoteFile, RemoteFileStore,
    RemoteOperation, RemoteResult, VersionMap,
};
pub use state::JournalManagerState;

use serde::{Deserialize, Serialize};

/// Progress information for a sync round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncProgress {
    /// Current stage of the sync round
    pub stage: SyncStage,
    /// Overall percentage complete (0-100)
    pub percent: u8,
    /// Optional detail message
    pub message: Option<String>,
}

impl SyncProgress {
    /// Progress at `stage` with no detail message.
    pub fn new(stage: SyncStage, percent: u8) -> Self {
        Self {
            stage,
            percent: percent.min(100),
            message: None,
        }
    }

    /// Attach a detail message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Stages of a sync round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    /// Pushing the local journal and pulling remote journals
    ExchangingFiles,
    /// Reading and merging journal diffs
    Merging,
    /// Sync completed
    Complete,
}
