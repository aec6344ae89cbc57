//! Journal bookkeeping and the remote sync protocol.
//!
//! [`JournalManager`] owns the local journal writer, the read offsets of every
//! known journal and the version tokens exchanged with the remote. A sync
//! round has two halves:
//!
//! 1. [`sync_files`](JournalManager::sync_files) pushes the local journal if
//!    it changed and downloads remote journals that are newer than the local
//!    copies.
//! 2. [`fetch_latest_commands_without_sync`](JournalManager::fetch_latest_commands_without_sync)
//!    reads new diffs across all journals. The offsets it moves to are only a
//!    proposal until [`acknowledge`](JournalManager::acknowledge) is called
//!    with `merged == true`.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use super::remote::{RemoteFile, RemoteFileStore, VersionMap};
use super::state::JournalManagerState;
use crate::config::SyncLimits;
use crate::error::{RemoteRequestFailure, Result, SyncFailure, TandemError};
use crate::journal::{JournalFileManaging, JournalReader, JournalWriter, validate_journal_id};
use crate::model::ObjectDiff;

/// The local journal, ready to be uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRequest {
    /// Identifier of the local journal
    pub journal_id: String,
    /// Full journal contents
    pub contents: Vec<u8>,
}

/// Diffs returned by one fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// The read cap was hit; more diffs remain.
    PartialResults {
        /// Diffs read
        diffs: Vec<ObjectDiff>,
        /// Share of the bytes known at the start of the round read so far
        progress: u8,
    },
    /// Every journal was read to its end.
    Results {
        /// Diffs read
        diffs: Vec<ObjectDiff>,
    },
}

impl FetchOutcome {
    /// The diffs read.
    pub fn diffs(&self) -> &[ObjectDiff] {
        match self {
            FetchOutcome::PartialResults { diffs, .. } | FetchOutcome::Results { diffs } => diffs,
        }
    }

    /// Take the diffs read.
    pub fn into_diffs(self) -> Vec<ObjectDiff> {
        match self {
            FetchOutcome::PartialResults { diffs, .. } | FetchOutcome::Results { diffs } => diffs,
        }
    }

    /// Whether more diffs remain to be read.
    pub fn is_partial(&self) -> bool {
        matches!(self, FetchOutcome::PartialResults { .. })
    }
}

/// Read offsets reached by a fetch, not committed yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetProposal {
    offsets: BTreeMap<String, u64>,
}

impl OffsetProposal {
    /// Proposed offset per journal.
    pub fn offsets(&self) -> &BTreeMap<String, u64> {
        &self.offsets
    }
}

/// Result of [`JournalManager::fetch_latest_commands_without_sync`].
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedBatch {
    /// The diffs read
    pub outcome: FetchOutcome,
    /// Offsets to commit once the diffs are merged
    pub proposal: OffsetProposal,
}

/// Remote journals whose version differs from the last seen local copy.
///
/// Journals in `excluded` (normally the local one) are never returned. The
/// result is sorted.
pub fn find_newer_remote_files(
    excluded: &[&str],
    local: &BTreeMap<String, String>,
    remote: &BTreeMap<String, String>,
) -> Vec<String> {
    remote
        .iter()
        .filter(|(id, _)| !excluded.contains(&id.as_str()))
        .filter(|(id, version)| local.get(*id) != Some(*version))
        .map(|(id, _)| id.clone())
        .collect()
}

/// Owns local journal writes, read offsets and remote sync state.
pub struct JournalManager {
    files: Arc<dyn JournalFileManaging>,
    remote: Option<Arc<dyn RemoteFileStore>>,
    state: JournalManagerState,
    state_path: Option<PathBuf>,
    writer: JournalWriter,
    readers: HashMap<String, JournalReader<File>>,
    limits: SyncLimits,
    /// Committed bytes when the current multi-batch pull started
    progress_start: Option<u64>,
}

impl JournalManager {
    /// Open the manager of the replica whose journal is `local_identifier`.
    ///
    /// State is loaded from `state_path` when it exists there, and saved back
    /// after every committed change.
    pub fn open(
        files: Arc<dyn JournalFileManaging>,
        local_identifier: &str,
        state_path: Option<PathBuf>,
        limits: SyncLimits,
    ) -> Result<Self> {
        validate_journal_id(local_identifier)?;

        let loaded = match &state_path {
            Some(path) => JournalManagerState::load(path)?,
            None => None,
        };
        let mut state = match loaded {
            Some(state) if state.local_identifier == local_identifier => state,
            Some(state) => {
                log::warn!(
                    "Sync state belongs to journal '{}', starting fresh for '{}'",
                    state.local_identifier,
                    local_identifier
                );
                JournalManagerState::new(local_identifier)
            }
            None => JournalManagerState::new(local_identifier),
        };
        state
            .journal_byte_offsets
            .entry(local_identifier.to_string())
            .or_insert(0);

        let writer = JournalWriter::open(files.journal_path(local_identifier)?)?;
        Ok(Self {
            files,
            remote: None,
            state,
            state_path,
            writer,
            readers: HashMap::new(),
            limits,
            progress_start: None,
        })
    }

    /// Sync through `remote`.
    pub fn with_remote(mut self, remote: Arc<dyn RemoteFileStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Replace the remote, or detach it with `None`.
    pub fn set_remote(&mut self, remote: Option<Arc<dyn RemoteFileStore>>) {
        self.remote = remote;
    }

    /// The remote synced through, if any.
    pub fn remote(&self) -> Option<Arc<dyn RemoteFileStore>> {
        self.remote.clone()
    }

    /// The committed bookkeeping.
    pub fn state(&self) -> &JournalManagerState {
        &self.state
    }

    /// Identifier of the local journal.
    pub fn local_identifier(&self) -> &str {
        &self.state.local_identifier
    }

    /// The journal file layout.
    pub fn files(&self) -> &Arc<dyn JournalFileManaging> {
        &self.files
    }

    /// Append locally made diffs to the local journal.
    pub fn append_local(&mut self, diffs: &[ObjectDiff]) -> Result<u64> {
        self.writer.append(diffs)
    }

    /// The local journal to upload, if the remote copy is not the one last
    /// pushed or local diffs were appended since.
    pub fn plan_push(&self, remote_versions: &VersionMap) -> Result<Option<PushRequest>> {
        let local = self.local_identifier();
        let size = self.files.journal_size(local)?;
        let unchanged = remote_versions.get(local) == self.state.last_local_version_pushed.as_ref()
            && self.state.last_local_size_pushed == Some(size);
        if unchanged {
            return Ok(None);
        }
        Ok(Some(PushRequest {
            journal_id: local.to_string(),
            contents: self.files.read_journal(local)?,
        }))
    }

    /// Record a successful push of `size` bytes that produced `version`.
    pub fn record_push(&mut self, size: u64, version: String) -> Result<()> {
        log::debug!("Pushed {} bytes as version {}", size, version);
        self.state.last_local_version_pushed = Some(version);
        self.state.last_local_size_pushed = Some(size);
        self.persist()
    }

    /// Remote journals to download.
    pub fn plan_fetch(&self, remote_versions: &VersionMap) -> Vec<String> {
        find_newer_remote_files(
            &[self.local_identifier()],
            &self.state.remote_file_versions,
            remote_versions,
        )
        .into_iter()
        .filter(|id| match validate_journal_id(id) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Ignoring remote journal: {}", e);
                false
            }
        })
        .collect()
    }

    /// Store downloaded journals locally. Returns the identifiers updated.
    pub fn apply_fetched(&mut self, files: Vec<RemoteFile>) -> Result<Vec<String>> {
        let mut updated = Vec::with_capacity(files.len());
        for file in files {
            if file.journal_id == self.state.local_identifier {
                log::warn!("Remote sent the local journal back, ignoring it");
                continue;
            }
            self.files.replace_journal(&file.journal_id, &file.contents)?;
            self.readers.remove(&file.journal_id);
            self.state
                .journal_byte_offsets
                .entry(file.journal_id.clone())
                .or_insert(0);
            self.state
                .remote_file_versions
                .insert(file.journal_id.clone(), file.version);
            updated.push(file.journal_id);
        }
        self.persist()?;
        Ok(updated)
    }

    /// Push the local journal and download newer remote journals.
    ///
    /// A failed push aborts the round before anything is downloaded.
    pub async fn sync_files(&mut self) -> Result<Vec<String>> {
        let remote = self.remote.clone().ok_or(SyncFailure::FetchRemoteVersionsFailed(
            RemoteRequestFailure::NoProvider,
        ))?;

        let versions = remote
            .fetch_remote_file_versions()
            .await
            .map_err(SyncFailure::FetchRemoteVersionsFailed)?;

        if let Some(push) = self.plan_push(&versions)? {
            let size = push.contents.len() as u64;
            let version = remote
                .push(&push.journal_id, push.contents)
                .await
                .map_err(SyncFailure::PushFailed)?;
            self.record_push(size, version)?;
        }

        let to_fetch = self.plan_fetch(&versions);
        if to_fetch.is_empty() {
            return Ok(Vec::new());
        }
        let files = remote
            .fetch_files(&to_fetch)
            .await
            .map_err(SyncFailure::FetchRemoteFilesFailed)?;
        self.apply_fetched(files)
    }

    /// Optionally sync files first, then read new diffs.
    pub async fn fetch_latest_commands(&mut self, sync_remote: bool) -> Result<FetchedBatch> {
        if sync_remote {
            let updated = self.sync_files().await?;
            log::debug!("Sync updated {} remote journals", updated.len());
        }
        self.fetch_latest_commands_without_sync()
    }

    /// Read new diffs across all known journals, round robin, up to the read
    /// batch limit. Nothing is committed until [`acknowledge`](Self::acknowledge).
    pub fn fetch_latest_commands_without_sync(&mut self) -> Result<FetchedBatch> {
        let mut offsets = self.state.journal_byte_offsets.clone();
        let mut sizes = BTreeMap::new();
        for id in offsets.keys() {
            sizes.insert(id.clone(), self.files.journal_size(id)?);
        }

        let start = *self
            .progress_start
            .get_or_insert_with(|| self.state.bytes_consumed());

        let mut active: Vec<String> = offsets
            .iter()
            .filter(|(id, offset)| sizes.get(*id) != Some(*offset))
            .map(|(id, _)| id.clone())
            .collect();
        let mut remaining = self.limits.read_batch_limit.max(1);
        let mut diffs = Vec::new();

        while remaining > 0 && !active.is_empty() {
            let share = (remaining / active.len()).max(1);
            let mut still_active = Vec::with_capacity(active.len());
            for id in active {
                if remaining == 0 {
                    still_active.push(id);
                    continue;
                }
                let take = share.min(remaining);
                let offset = offsets.get(&id).copied().unwrap_or(0);
                let batch = self.read_journal(&id, offset, take)?;
                remaining -= batch.diffs.len();
                offsets.insert(id.clone(), batch.next_offset);
                let exhausted = batch.diffs.len() < take || batch.stopped_at_unreadable;
                diffs.extend(batch.diffs);
                if !exhausted {
                    still_active.push(id);
                }
            }
            active = still_active;
        }

        let proposal = OffsetProposal {
            offsets: offsets
                .into_iter()
                .filter(|(id, offset)| self.state.journal_byte_offsets.get(id) != Some(offset))
                .collect(),
        };

        let outcome = if remaining == 0 && !active.is_empty() {
            let total: u64 = sizes.values().sum();
            let consumed = self.state.bytes_consumed()
                + proposal
                    .offsets
                    .iter()
                    .map(|(id, offset)| {
                        offset.saturating_sub(
                            self.state.journal_byte_offsets.get(id).copied().unwrap_or(0),
                        )
                    })
                    .sum::<u64>();
            let done = consumed.saturating_sub(start);
            let todo = total.saturating_sub(start).max(1);
            FetchOutcome::PartialResults {
                diffs,
                progress: (done.saturating_mul(100) / todo).min(100) as u8,
            }
        } else {
            self.progress_start = None;
            FetchOutcome::Results { diffs }
        };

        log::debug!(
            "Fetched {} diffs ({})",
            outcome.diffs().len(),
            if outcome.is_partial() { "partial" } else { "complete" }
        );
        Ok(FetchedBatch { outcome, proposal })
    }

    /// Commit `proposal` if the diffs it covers were merged.
    pub fn acknowledge(&mut self, proposal: OffsetProposal, merged: bool) -> Result<()> {
        if !merged {
            log::debug!("Merge failed, keeping journal offsets");
            return Ok(());
        }
        if proposal.offsets.is_empty() {
            return Ok(());
        }
        self.state.journal_byte_offsets.extend(proposal.offsets);
        self.persist()
    }

    fn read_journal(
        &mut self,
        journal_id: &str,
        offset: u64,
        max_records: usize,
    ) -> Result<crate::journal::ReadBatch> {
        if !self.readers.contains_key(journal_id) {
            let reader = JournalReader::open(self.files.journal_path(journal_id)?)?
                .with_chunk_size(self.limits.reader_chunk_size);
            self.readers.insert(journal_id.to_string(), reader);
        }
        let Some(reader) = self.readers.get_mut(journal_id) else {
            return Err(TandemError::InvalidJournalId(journal_id.to_string()));
        };
        match reader.read_next(offset, max_records) {
            Err(TandemError::UnrecoverableJournalOffset { offset, scanned }) => {
                log::warn!(
                    "Journal '{}' has no record boundary near offset {} ({} bytes scanned), rereading it from the start",
                    journal_id,
                    offset,
                    scanned
                );
                reader.read_next(0, max_records)
            }
            result => result,
        }
    }

    fn persist(&self) -> Result<()> {
        match &self.state_path {
            Some(path) => self.state.save(path),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for JournalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalManager")
            .field("state", &self.state)
            .field("state_path", &self.state_path)
            .field("has_remote", &self.remote.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{JournalDirectory, encode_line};
    use crate::model::{DatabaseObject, Timestamp};
    use crate::sync::{MemoryRemoteStore, RemoteOperation};
    use chrono::{TimeZone, Utc};
    use futures_lite::future::block_on;

    fn at(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn inserts(prefix: &str, count: usize) -> Vec<ObjectDiff> {
        (0..count)
            .map(|i| ObjectDiff::Insert {
                identifier: format!("{}-{}", prefix, i),
                timestamp: at(i as i64),
                object: DatabaseObject::new("item"),
            })
            .collect()
    }

    fn journal_bytes(diffs: &[ObjectDiff]) -> Vec<u8> {
        diffs
            .iter()
            .flat_map(|d| encode_line(d).unwrap().into_bytes())
            .collect()
    }

    fn remote_file(id: &str, diffs: &[ObjectDiff]) -> RemoteFile {
        RemoteFile {
            journal_id: id.to_string(),
            contents: journal_bytes(diffs),
            version: "1".to_string(),
        }
    }

    fn manager(dir: &std::path::Path, limits: SyncLimits) -> JournalManager {
        let files = Arc::new(JournalDirectory::open(dir.join("journals")).unwrap());
        JournalManager::open(files, "local", Some(dir.join("sync_state.json")), limits).unwrap()
    }

    fn limits(read_batch_limit: usize) -> SyncLimits {
        SyncLimits {
            read_batch_limit,
            ..SyncLimits::default()
        }
    }

    #[test]
    fn test_find_newer_remote_files() {
        let mut remote = BTreeMap::new();
        remote.insert("f1".to_string(), "1".to_string());
        remote.insert("f2".to_string(), "2".to_string());
        remote.insert("local".to_string(), "9".to_string());

        let local = BTreeMap::new();
        assert_eq!(
            find_newer_remote_files(&["local"], &local, &remote),
            vec!["f1", "f2"]
        );

        let mut local = BTreeMap::new();
        local.insert("f1".to_string(), "1".to_string());
        assert_eq!(find_newer_remote_files(&["local"], &local, &remote), vec!["f2"]);
    }

    #[test]
    fn test_batch_cap_returns_partial_then_rest() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager(dir.path(), limits(100));
        manager
            .apply_fetched(vec![
                remote_file("j1", &inserts("a", 105)),
                remote_file("j2", &inserts("b", 10)),
            ])
            .unwrap();

        let first = manager.fetch_latest_commands_without_sync().unwrap();
        assert!(first.outcome.is_partial());
        assert_eq!(first.outcome.diffs().len(), 100);
        manager.acknowledge(first.proposal, true).unwrap();

        let second = manager.fetch_latest_commands_without_sync().unwrap();
        assert!(!second.outcome.is_partial());
        assert_eq!(second.outcome.diffs().len(), 15);
        manager.acknowledge(second.proposal, true).unwrap();

        let third = manager.fetch_latest_commands_without_sync().unwrap();
        assert!(third.outcome.diffs().is_empty());
        assert!(third.proposal.offsets().is_empty());
    }

    #[test]
    fn test_partial_progress_grows() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager(dir.path(), limits(10));
        manager
            .apply_fetched(vec![remote_file("j1", &inserts("a", 30))])
            .unwrap();

        let mut seen = Vec::new();
        loop {
            let batch = manager.fetch_latest_commands_without_sync().unwrap();
            let partial = match &batch.outcome {
                FetchOutcome::PartialResults { progress, .. } => {
                    seen.push(*progress);
                    true
                }
                FetchOutcome::Results { .. } => false,
            };
            manager.acknowledge(batch.proposal, true).unwrap();
            if !partial {
                break;
            }
        }
        assert_eq!(seen.len(), 3);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_failed_merge_keeps_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager(dir.path(), limits(1000));
        manager
            .apply_fetched(vec![remote_file("j1", &inserts("a", 5))])
            .unwrap();

        let first = manager.fetch_latest_commands_without_sync().unwrap();
        manager.acknowledge(first.proposal.clone(), false).unwrap();
        assert_eq!(manager.state().journal_byte_offsets.get("j1"), Some(&0));

        let again = manager.fetch_latest_commands_without_sync().unwrap();
        assert_eq!(again, first);
    }

    #[test]
    fn test_local_journal_is_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager(dir.path(), limits(1000));
        let diffs = inserts("l", 3);
        manager.append_local(&diffs).unwrap();

        let batch = manager.fetch_latest_commands_without_sync().unwrap();
        assert_eq!(batch.outcome.into_diffs(), diffs);
    }

    #[test]
    fn test_offsets_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut manager = manager(dir.path(), limits(1000));
            manager
                .apply_fetched(vec![remote_file("j1", &inserts("a", 4))])
                .unwrap();
            let batch = manager.fetch_latest_commands_without_sync().unwrap();
            manager.acknowledge(batch.proposal, true).unwrap();
        }

        let mut reopened = manager(dir.path(), limits(1000));
        assert_eq!(
            reopened.state().remote_file_versions.get("j1"),
            Some(&"1".to_string())
        );
        let batch = reopened.fetch_latest_commands_without_sync().unwrap();
        assert!(batch.outcome.diffs().is_empty());
    }

    #[test]
    fn test_sync_files_pushes_only_when_changed() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemoteStore::new();
        let mut manager = manager(dir.path(), limits(1000)).with_remote(Arc::new(remote.clone()));

        manager.append_local(&inserts("l", 2)).unwrap();
        block_on(manager.sync_files()).unwrap();
        assert_eq!(remote.request_count(RemoteOperation::Push), 1);
        assert_eq!(
            remote.contents("local").unwrap(),
            journal_bytes(&inserts("l", 2))
        );

        block_on(manager.sync_files()).unwrap();
        assert_eq!(remote.request_count(RemoteOperation::Push), 1);

        manager.append_local(&inserts("m", 1)).unwrap();
        block_on(manager.sync_files()).unwrap();
        assert_eq!(remote.request_count(RemoteOperation::Push), 2);
    }

    #[test]
    fn test_sync_files_downloads_newer_journals() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemoteStore::new();
        remote.put("phone", journal_bytes(&inserts("p", 2)));
        let mut manager = manager(dir.path(), limits(1000)).with_remote(Arc::new(remote.clone()));

        assert_eq!(block_on(manager.sync_files()).unwrap(), vec!["phone"]);
        assert!(block_on(manager.sync_files()).unwrap().is_empty());

        let batch = block_on(manager.fetch_latest_commands(false)).unwrap();
        assert_eq!(batch.outcome.diffs().len(), 2);
    }

    #[test]
    fn test_push_failure_skips_download() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemoteStore::new();
        remote.put("phone", journal_bytes(&inserts("p", 2)));
        remote.set_failure(RemoteOperation::Push, Some(RemoteRequestFailure::NoNetwork));
        let mut manager = manager(dir.path(), limits(1000)).with_remote(Arc::new(remote.clone()));

        let err = block_on(manager.sync_files()).unwrap_err();
        assert!(matches!(
            err,
            TandemError::Sync(SyncFailure::PushFailed(RemoteRequestFailure::NoNetwork))
        ));
        assert_eq!(remote.request_count(RemoteOperation::FetchFiles), 0);
        assert!(manager.state().remote_file_versions.is_empty());
    }

    #[test]
    fn test_sync_without_remote_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager(dir.path(), limits(1000));
        let err = block_on(manager.sync_files()).unwrap_err();
        assert!(matches!(
            err,
            TandemError::Sync(SyncFailure::FetchRemoteVersionsFailed(
                RemoteRequestFailure::NoProvider
            ))
        ));
    }
}
