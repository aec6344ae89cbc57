//! The change-tracking session.
//!
//! A [`Session`] composes the three owners of state: the history tracker, the
//! object store and the journal manager. Local edits are written to the local
//! journal and queued; a sync pulls diffs from every journal and queues them
//! too. Queued diffs are merged in batches of
//! [`SyncLimits::merge_batch_size`], and journal offsets are only committed
//! once the diffs read up to them were merged.
//!
//! [`Session`] is driven directly by a single owner. With the `actor`
//! feature, [`SessionHandle`] runs it on its own thread behind a message
//! queue.

#[cfg(all(not(target_arch = "wasm32"), feature = "actor"))]
mod actor;
mod events;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

#[cfg(all(not(target_arch = "wasm32"), feature = "actor"))]
pub use actor::SessionHandle;
pub use events::{ChangeEvent, EventCallback, EventRegistry, SubscriptionId};

use crate::config::{Config, HistoryBackend, SyncLimits};
use crate::error::{Result, TandemError};
use crate::history::{MemoryHistoryStore, MergeResult, ObjectHistoryStore, ObjectHistoryTracker};
use crate::journal::JournalDirectory;
use crate::model::{DatabaseObject, ObjectDiff};
use crate::store::{FetchCursor, FetchPage, MemoryObjectStore, ObjectCount, ObjectStore, Predicate};
use crate::sync::{
    DirectoryRemoteStore, FetchedBatch, JournalManager, OffsetProposal, SyncProgress, SyncStage,
};

/// Where appended diffs come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOrigin {
    /// Made on this replica; written to the local journal.
    Local,
    /// Read from a journal; not written again.
    Remote,
}

/// One merge batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessedBatch {
    /// Queued diffs consumed by the batch
    pub consumed: usize,
    /// Changes applied to the object set
    pub result: MergeResult,
}

/// Outcome of a completed sync round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Remote journals downloaded
    pub journals_updated: Vec<String>,
    /// Diffs read from journals
    pub diffs_read: usize,
    /// Journal fetches performed
    pub batches: usize,
}

/// Session over the stores a CLI replica uses.
pub type ReplicaSession = Session<Box<dyn ObjectHistoryStore>, MemoryObjectStore>;

/// Orchestrates local edits, merges and sync rounds.
pub struct Session<H, O> {
    tracker: ObjectHistoryTracker<H>,
    objects: O,
    journals: JournalManager,
    unprocessed: VecDeque<ObjectDiff>,
    limits: SyncLimits,
    events: Arc<EventRegistry>,
    history_path: Option<PathBuf>,
    objects_path: Option<PathBuf>,
}

impl<H: ObjectHistoryStore, O: ObjectStore> Session<H, O> {
    /// Compose a session.
    pub fn new(history: H, objects: O, journals: JournalManager, limits: SyncLimits) -> Self {
        Self {
            tracker: ObjectHistoryTracker::new(history),
            objects,
            journals,
            unprocessed: VecDeque::new(),
            limits,
            events: Arc::new(EventRegistry::new()),
            history_path: None,
            objects_path: None,
        }
    }

    /// Where [`save`](Self::save) writes the history and object stores.
    pub fn with_snapshot_paths(mut self, history: PathBuf, objects: PathBuf) -> Self {
        self.history_path = Some(history);
        self.objects_path = Some(objects);
        self
    }

    /// The event registry of this session.
    pub fn events(&self) -> &Arc<EventRegistry> {
        &self.events
    }

    /// Subscribe to change events.
    pub fn subscribe(&self, callback: EventCallback) -> SubscriptionId {
        self.events.subscribe(callback)
    }

    /// The journal manager.
    pub fn journals(&self) -> &JournalManager {
        &self.journals
    }

    /// The journal manager, for driving sync steps one by one.
    pub fn journals_mut(&mut self) -> &mut JournalManager {
        &mut self.journals
    }

    /// The history tracker.
    pub fn tracker(&self) -> &ObjectHistoryTracker<H> {
        &self.tracker
    }

    /// The batch sizes in use.
    pub fn limits(&self) -> SyncLimits {
        self.limits
    }

    /// Queue `diffs` for merging. Local diffs are written to the local
    /// journal first.
    pub fn append(&mut self, diffs: Vec<ObjectDiff>, origin: DiffOrigin) -> Result<()> {
        if diffs.is_empty() {
            return Ok(());
        }
        if origin == DiffOrigin::Local {
            self.journals.append_local(&diffs)?;
        }
        self.unprocessed.extend(diffs);
        Ok(())
    }

    /// Number of queued diffs not merged yet.
    pub fn unprocessed_len(&self) -> usize {
        self.unprocessed.len()
    }

    /// Merge at most one batch of queued diffs.
    ///
    /// Histories left pending by an earlier merge are merged too, so this is
    /// also useful with an empty queue.
    pub fn process_pending(&mut self) -> Result<ProcessedBatch> {
        let take = self.limits.merge_batch_size.max(1).min(self.unprocessed.len());
        let batch: Vec<ObjectDiff> = self.unprocessed.drain(..take).collect();

        self.tracker.enqueue(batch)?;
        let objects = &self.objects;
        let result = self.tracker.process(|identifier| objects.object(identifier))?;
        if let Err(e) = self.objects.apply(&result) {
            let touched = result.inserted.keys().chain(result.updated.keys());
            self.tracker.requeue(touched.chain(&result.removed))?;
            return Err(e);
        }

        if !result.is_empty() {
            self.events.emit(&ChangeEvent::Merged(result.clone()));
        }
        Ok(ProcessedBatch {
            consumed: take,
            result,
        })
    }

    /// Merge until the queue is empty. Returns the number of objects changed.
    pub fn drain(&mut self) -> Result<usize> {
        let mut changed = 0;
        loop {
            let batch = self.process_pending()?;
            changed += batch.result.len();
            if self.unprocessed.is_empty() {
                return Ok(changed);
            }
        }
    }

    /// Read the next batch of journal diffs without contacting the remote.
    pub fn fetch_batch(&mut self) -> Result<FetchedBatch> {
        self.journals.fetch_latest_commands_without_sync()
    }

    /// Commit or drop the offsets of a fetched batch. Snapshots are written
    /// before offsets are committed.
    pub fn commit(&mut self, proposal: OffsetProposal, merged: bool) -> Result<()> {
        if merged {
            self.save()?;
        }
        self.journals.acknowledge(proposal, merged)
    }

    /// Queue a fetched batch, merge it and commit its offsets. On a merge
    /// error the offsets are left untouched.
    pub fn merge_fetched(&mut self, batch: FetchedBatch) -> Result<()> {
        let FetchedBatch { outcome, proposal } = batch;
        let merged = self
            .append(outcome.into_diffs(), DiffOrigin::Remote)
            .and_then(|()| self.drain());
        match merged {
            Ok(_) => self.commit(proposal, true),
            Err(e) => {
                self.commit(proposal, false)?;
                Err(e)
            }
        }
    }

    /// Run one sync round: exchange journal files with the remote, then pull
    /// and merge new diffs until every journal is read to its end.
    pub async fn sync(&mut self) -> Result<SyncSummary> {
        match self.run_sync().await {
            Ok(summary) => {
                self.emit_progress(SyncProgress::new(SyncStage::Complete, 100));
                self.events.emit(&ChangeEvent::SyncCompleted {
                    diffs_read: summary.diffs_read,
                    journals_updated: summary.journals_updated.clone(),
                });
                Ok(summary)
            }
            Err(e) => {
                self.emit_failure(&e);
                Err(e)
            }
        }
    }

    async fn run_sync(&mut self) -> Result<SyncSummary> {
        let mut summary = SyncSummary::default();

        self.emit_progress(SyncProgress::new(SyncStage::ExchangingFiles, 0));
        summary.journals_updated = self.journals.sync_files().await?;

        loop {
            let batch = self.fetch_batch()?;
            let partial = batch.outcome.is_partial();
            let progress = match &batch.outcome {
                crate::sync::FetchOutcome::PartialResults { progress, .. } => *progress,
                crate::sync::FetchOutcome::Results { .. } => 100,
            };
            summary.diffs_read += batch.outcome.diffs().len();
            summary.batches += 1;

            self.merge_fetched(batch)?;
            if !partial {
                return Ok(summary);
            }
            self.emit_progress(SyncProgress::new(SyncStage::Merging, progress));
        }
    }

    pub(crate) fn emit_progress(&self, progress: SyncProgress) {
        self.events.emit(&ChangeEvent::SyncProgress(progress));
    }

    pub(crate) fn emit_failure(&self, error: &TandemError) {
        log::warn!("Sync failed: {}", error);
        let failure = match error {
            TandemError::Sync(failure) => Some(*failure),
            _ => None,
        };
        self.events.emit(&ChangeEvent::SyncFailed {
            failure,
            message: error.to_string(),
        });
    }

    /// The object with `identifier`.
    pub fn object(&self, identifier: &str) -> Result<Option<DatabaseObject>> {
        self.objects.object(identifier)
    }

    /// Start a paginated fetch.
    pub fn fetch(
        &self,
        object_type: Option<&str>,
        limit: usize,
        predicate: Option<Predicate>,
    ) -> Result<FetchPage> {
        self.objects.fetch(object_type, limit, predicate)
    }

    /// Continue a paginated fetch.
    pub fn fetch_more(&self, cursor: &FetchCursor, limit: usize) -> Result<FetchPage> {
        self.objects.fetch_more(cursor, limit)
    }

    /// Approximate number of matching objects.
    pub fn count(&self, object_type: Option<&str>, predicate: Option<Predicate>) -> Result<ObjectCount> {
        self.objects.count(object_type, predicate)
    }

    /// Write the history and object stores to their snapshot paths.
    pub fn save(&self) -> Result<()> {
        if let Some(path) = &self.history_path {
            self.tracker.save(path)?;
        }
        if let Some(path) = &self.objects_path {
            self.objects.save(path)?;
        }
        Ok(())
    }
}

impl<H, O> std::fmt::Debug for Session<H, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("journals", &self.journals)
            .field("unprocessed", &self.unprocessed.len())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

/// Open the replica described by `config`: its journals, sync state, stores
/// and, if `remote_dir` is set, its directory remote.
pub fn open_replica(config: &Config) -> Result<ReplicaSession> {
    let limits = config.limits();
    let files = Arc::new(JournalDirectory::open(config.journals_dir())?);
    let mut journals = JournalManager::open(
        files,
        &config.replica_id,
        Some(config.sync_state_path()),
        limits,
    )?;
    if let Some(remote_dir) = &config.remote_dir {
        journals.set_remote(Some(Arc::new(DirectoryRemoteStore::new(remote_dir.clone()))));
    }

    let history_path = config.history_path();
    let history: Box<dyn ObjectHistoryStore> = match config.history_backend {
        HistoryBackend::Memory => Box::new(MemoryHistoryStore::load(
            &history_path,
            config.pending_updates,
        )?),
        #[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
        HistoryBackend::Sqlite => Box::new(crate::history::SqliteHistoryStore::open(
            &history_path,
            config.pending_updates,
        )?),
        #[cfg(not(all(not(target_arch = "wasm32"), feature = "sqlite")))]
        HistoryBackend::Sqlite => {
            return Err(TandemError::InvalidRecord(
                "history_backend = \"sqlite\" needs the sqlite feature".to_string(),
            ));
        }
    };
    let objects_path = config.objects_path();
    let objects = MemoryObjectStore::load(&objects_path)?;

    Ok(Session::new(history, objects, journals, limits).with_snapshot_paths(history_path, objects_path))
}
