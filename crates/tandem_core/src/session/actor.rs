//! The session actor.
//!
//! [`SessionHandle::spawn`] moves a [`Session`] onto a dedicated thread that
//! runs a single-threaded tokio runtime. Every entry point becomes an
//! [`Action`] message answered over a `oneshot` channel, so all mutations of
//! the session are serialized. Remote requests run as spawned tasks and
//! report back as messages, which keeps local edits flowing while a sync
//! waits on the network. Merges run one batch per `Drain` message; each batch
//! re-queues the next one behind whatever arrived meanwhile.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::events::{EventCallback, EventRegistry, SubscriptionId};
use super::{DiffOrigin, Session, SyncSummary};
use crate::error::{RemoteRequestFailure, Result, SyncFailure, TandemError};
use crate::history::ObjectHistoryStore;
use crate::model::{DatabaseObject, ObjectDiff};
use crate::store::{FetchCursor, FetchPage, ObjectCount, ObjectStore, Predicate};
use crate::sync::{
    FetchOutcome, OffsetProposal, RemoteFile, RemoteFileStore, RemoteResult, SyncProgress,
    SyncStage, VersionMap,
};

enum Action {
    Append {
        diffs: Vec<ObjectDiff>,
        reply: oneshot::Sender<Result<()>>,
    },
    Object {
        identifier: String,
        reply: oneshot::Sender<Result<Option<DatabaseObject>>>,
    },
    Fetch {
        object_type: Option<String>,
        limit: usize,
        predicate: Option<Predicate>,
        reply: oneshot::Sender<Result<FetchPage>>,
    },
    FetchMore {
        cursor: FetchCursor,
        limit: usize,
        reply: oneshot::Sender<Result<FetchPage>>,
    },
    Count {
        object_type: Option<String>,
        predicate: Option<Predicate>,
        reply: oneshot::Sender<Result<ObjectCount>>,
    },
    Flush {
        reply: oneshot::Sender<Result<()>>,
    },
    Sync {
        reply: oneshot::Sender<Result<SyncSummary>>,
    },
    Save {
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown {
        reply: oneshot::Sender<Result<()>>,
    },
    /// Merge the next batch of queued diffs
    Drain,
    RemoteVersions(RemoteResult<VersionMap>),
    Pushed {
        size: u64,
        versions: VersionMap,
        result: RemoteResult<String>,
    },
    Fetched(RemoteResult<Vec<RemoteFile>>),
}

/// Offsets waiting for the diffs queued before them to be merged.
struct PendingAck {
    proposal: OffsetProposal,
    partial: bool,
    progress: u8,
    /// Queued diffs that still have to be merged before committing
    remaining: usize,
}

struct ActiveSync {
    reply: oneshot::Sender<Result<SyncSummary>>,
    summary: SyncSummary,
    pending_ack: Option<PendingAck>,
}

struct Actor<H, O> {
    session: Session<H, O>,
    action_rx: mpsc::UnboundedReceiver<Action>,
    action_tx: mpsc::WeakUnboundedSender<Action>,
    progress_tx: Option<mpsc::UnboundedSender<SyncProgress>>,
    drain_scheduled: bool,
    active_sync: Option<ActiveSync>,
}

/// Handle to a session running on its own thread.
///
/// Handles are cheap to clone. The session stops and saves its stores when
/// [`shutdown`](Self::shutdown) is called or the last handle is dropped.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Action>,
    events: Arc<EventRegistry>,
}

impl SessionHandle {
    /// Spawn `session` on a new thread. Sync progress is also sent to
    /// `progress`, if given.
    pub fn spawn<H, O>(
        session: Session<H, O>,
        progress: Option<mpsc::UnboundedSender<SyncProgress>>,
    ) -> Result<Self>
    where
        H: ObjectHistoryStore + 'static,
        O: ObjectStore + 'static,
    {
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        let events = Arc::clone(session.events());
        let actor = Actor {
            session,
            action_rx,
            action_tx: action_tx.downgrade(),
            progress_tx: progress,
            drain_scheduled: false,
            active_sync: None,
        };

        std::thread::Builder::new()
            .name("tandem-session".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        log::error!("Failed to start session runtime: {}", e);
                        return;
                    }
                };
                runtime.block_on(actor.run());
            })?;

        Ok(Self {
            tx: action_tx,
            events,
        })
    }

    async fn call<T>(&self, action: impl FnOnce(oneshot::Sender<Result<T>>) -> Action) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(action(reply))
            .map_err(|_| TandemError::SessionClosed)?;
        rx.await.map_err(|_| TandemError::SessionClosed)?
    }

    /// Record local edits. They are merged shortly after.
    pub async fn append(&self, diffs: Vec<ObjectDiff>) -> Result<()> {
        self.call(|reply| Action::Append { diffs, reply }).await
    }

    /// The object with `identifier`, as of the last merged batch.
    pub async fn object(&self, identifier: impl Into<String>) -> Result<Option<DatabaseObject>> {
        let identifier = identifier.into();
        self.call(|reply| Action::Object { identifier, reply }).await
    }

    /// Start a paginated fetch.
    pub async fn fetch(
        &self,
        object_type: Option<&str>,
        limit: usize,
        predicate: Option<Predicate>,
    ) -> Result<FetchPage> {
        let object_type = object_type.map(str::to_string);
        self.call(|reply| Action::Fetch {
            object_type,
            limit,
            predicate,
            reply,
        })
        .await
    }

    /// Continue a paginated fetch.
    pub async fn fetch_more(&self, cursor: FetchCursor, limit: usize) -> Result<FetchPage> {
        self.call(|reply| Action::FetchMore {
            cursor,
            limit,
            reply,
        })
        .await
    }

    /// Approximate number of matching objects.
    pub async fn count(
        &self,
        object_type: Option<&str>,
        predicate: Option<Predicate>,
    ) -> Result<ObjectCount> {
        let object_type = object_type.map(str::to_string);
        self.call(|reply| Action::Count {
            object_type,
            predicate,
            reply,
        })
        .await
    }

    /// Merge everything queued so far before answering.
    pub async fn flush(&self) -> Result<()> {
        self.call(|reply| Action::Flush { reply }).await
    }

    /// Run a sync round. Fails with [`TandemError::SyncInProgress`] if one is
    /// already running.
    pub async fn sync(&self) -> Result<SyncSummary> {
        self.call(|reply| Action::Sync { reply }).await
    }

    /// Write the stores to their snapshot paths.
    pub async fn save(&self) -> Result<()> {
        self.call(|reply| Action::Save { reply }).await
    }

    /// Merge what is queued, save and stop the session.
    pub async fn shutdown(self) -> Result<()> {
        self.call(|reply| Action::Shutdown { reply }).await
    }

    /// Subscribe to change events.
    pub fn subscribe(&self, callback: EventCallback) -> SubscriptionId {
        self.events.subscribe(callback)
    }

    /// The session's event registry.
    pub fn events(&self) -> &Arc<EventRegistry> {
        &self.events
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("closed", &self.tx.is_closed())
            .finish_non_exhaustive()
    }
}

impl<H: ObjectHistoryStore, O: ObjectStore> Actor<H, O> {
    async fn run(mut self) {
        // Histories left pending by a previous run.
        self.schedule_drain();

        while let Some(action) = self.action_rx.recv().await {
            if !self.handle(action) {
                break;
            }
        }

        if let Some(active) = self.active_sync.take() {
            let _ = active.reply.send(Err(TandemError::SessionClosed));
        }
        if let Err(e) = self.session.save() {
            log::error!("Failed to save session on shutdown: {}", e);
        }
        log::debug!("Session actor stopped");
    }

    /// Returns `false` once the actor should stop.
    fn handle(&mut self, action: Action) -> bool {
        match action {
            Action::Append { diffs, reply } => {
                let result = self.session.append(diffs, DiffOrigin::Local);
                if result.is_ok() {
                    self.schedule_drain();
                }
                let _ = reply.send(result);
            }
            Action::Object { identifier, reply } => {
                let _ = reply.send(self.session.object(&identifier));
            }
            Action::Fetch {
                object_type,
                limit,
                predicate,
                reply,
            } => {
                let _ = reply.send(self.session.fetch(object_type.as_deref(), limit, predicate));
            }
            Action::FetchMore {
                cursor,
                limit,
                reply,
            } => {
                let _ = reply.send(self.session.fetch_more(&cursor, limit));
            }
            Action::Count {
                object_type,
                predicate,
                reply,
            } => {
                let _ = reply.send(self.session.count(object_type.as_deref(), predicate));
            }
            Action::Flush { reply } => {
                let _ = reply.send(self.flush());
            }
            Action::Sync { reply } => self.start_sync(reply),
            Action::Save { reply } => {
                let _ = reply.send(self.session.save());
            }
            Action::Shutdown { reply } => {
                let result = self.flush().and_then(|()| self.session.save());
                let _ = reply.send(result);
                return false;
            }
            Action::Drain => {
                self.drain_scheduled = false;
                self.drain_one();
            }
            Action::RemoteVersions(result) => self.on_versions(result),
            Action::Pushed {
                size,
                versions,
                result,
            } => self.on_pushed(size, versions, result),
            Action::Fetched(result) => self.on_fetched(result),
        }
        true
    }

    fn schedule_drain(&mut self) {
        if self.drain_scheduled {
            return;
        }
        if let Some(tx) = self.action_tx.upgrade()
            && tx.send(Action::Drain).is_ok()
        {
            self.drain_scheduled = true;
        }
    }

    /// Run `request` on the runtime and feed its result back as an action.
    fn spawn_remote<F>(&self, request: F)
    where
        F: Future<Output = Action> + Send + 'static,
    {
        let Some(tx) = self.action_tx.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let _ = tx.send(request.await);
        });
    }

    fn emit_progress(&self, progress: SyncProgress) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(progress.clone());
        }
        self.session.emit_progress(progress);
    }

    fn drain_one(&mut self) {
        match self.session.process_pending() {
            Ok(batch) => {
                if self.session.unprocessed_len() > 0 {
                    self.schedule_drain();
                }
                self.after_merge(batch.consumed);
            }
            Err(e) => {
                log::error!("Merge failed: {}", e);
                let _ = self.abort_pending_ack(e);
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        let queued = self.session.unprocessed_len();
        match self.session.drain() {
            Ok(_) => {
                self.after_merge(queued);
                Ok(())
            }
            Err(e) => {
                log::error!("Flush failed: {}", e);
                match self.abort_pending_ack(e) {
                    Some(e) => Err(e),
                    None => Err(TandemError::SyncAborted),
                }
            }
        }
    }

    /// Drop the offsets of the batch being merged and fail the sync with
    /// `error`. Hands `error` back when no batch was awaiting its merge.
    fn abort_pending_ack(&mut self, error: TandemError) -> Option<TandemError> {
        let Some(ack) = self
            .active_sync
            .as_mut()
            .and_then(|active| active.pending_ack.take())
        else {
            return Some(error);
        };
        if let Err(e) = self.session.commit(ack.proposal, false) {
            log::error!("Failed to drop journal offsets: {}", e);
        }
        self.fail_sync(error);
        None
    }

    fn after_merge(&mut self, consumed: usize) {
        let Some(active) = self.active_sync.as_mut() else {
            return;
        };
        let Some(ack) = active.pending_ack.as_mut() else {
            return;
        };
        ack.remaining = ack.remaining.saturating_sub(consumed);
        if ack.remaining > 0 {
            return;
        }
        let Some(ack) = active.pending_ack.take() else {
            return;
        };

        if let Err(e) = self.session.commit(ack.proposal, true) {
            self.fail_sync(e);
            return;
        }
        if ack.partial {
            self.emit_progress(SyncProgress::new(SyncStage::Merging, ack.progress));
            self.start_batch();
        } else {
            self.complete_sync();
        }
    }

    fn start_sync(&mut self, reply: oneshot::Sender<Result<SyncSummary>>) {
        if self.active_sync.is_some() {
            let _ = reply.send(Err(TandemError::SyncInProgress));
            return;
        }
        self.active_sync = Some(ActiveSync {
            reply,
            summary: SyncSummary::default(),
            pending_ack: None,
        });
        self.emit_progress(SyncProgress::new(SyncStage::ExchangingFiles, 0));

        let Some(remote) = self.remote() else {
            return;
        };
        self.spawn_remote(async move {
            Action::RemoteVersions(remote.fetch_remote_file_versions().await)
        });
    }

    /// The remote, or a failed sync if there is none.
    fn remote(&mut self) -> Option<Arc<dyn RemoteFileStore>> {
        let remote = self.session.journals().remote();
        if remote.is_none() {
            self.fail_sync(
                SyncFailure::FetchRemoteVersionsFailed(RemoteRequestFailure::NoProvider).into(),
            );
        }
        remote
    }

    fn on_versions(&mut self, result: RemoteResult<VersionMap>) {
        let versions = match result {
            Ok(versions) => versions,
            Err(failure) => return self.fail_sync(SyncFailure::FetchRemoteVersionsFailed(failure).into()),
        };
        match self.session.journals().plan_push(&versions) {
            Ok(Some(push)) => {
                let Some(remote) = self.remote() else {
                    return;
                };
                let size = push.contents.len() as u64;
                self.spawn_remote(async move {
                    let result = remote.push(&push.journal_id, push.contents).await;
                    Action::Pushed {
                        size,
                        versions,
                        result,
                    }
                });
            }
            Ok(None) => self.fetch_files(versions),
            Err(e) => self.fail_sync(e),
        }
    }

    fn on_pushed(&mut self, size: u64, versions: VersionMap, result: RemoteResult<String>) {
        let version = match result {
            Ok(version) => version,
            Err(failure) => return self.fail_sync(SyncFailure::PushFailed(failure).into()),
        };
        if let Err(e) = self.session.journals_mut().record_push(size, version) {
            return self.fail_sync(e);
        }
        self.fetch_files(versions);
    }

    fn fetch_files(&mut self, versions: VersionMap) {
        let to_fetch = self.session.journals().plan_fetch(&versions);
        if to_fetch.is_empty() {
            return self.start_batch();
        }
        let Some(remote) = self.remote() else {
            return;
        };
        self.spawn_remote(async move { Action::Fetched(remote.fetch_files(&to_fetch).await) });
    }

    fn on_fetched(&mut self, result: RemoteResult<Vec<RemoteFile>>) {
        let files = match result {
            Ok(files) => files,
            Err(failure) => return self.fail_sync(SyncFailure::FetchRemoteFilesFailed(failure).into()),
        };
        match self.session.journals_mut().apply_fetched(files) {
            Ok(updated) => {
                if let Some(active) = self.active_sync.as_mut() {
                    active.summary.journals_updated = updated;
                }
                self.start_batch();
            }
            Err(e) => self.fail_sync(e),
        }
    }

    /// Read the next journal batch and queue it behind pending local edits.
    fn start_batch(&mut self) {
        let batch = match self.session.fetch_batch() {
            Ok(batch) => batch,
            Err(e) => return self.fail_sync(e),
        };
        let partial = batch.outcome.is_partial();
        let progress = match &batch.outcome {
            FetchOutcome::PartialResults { progress, .. } => *progress,
            FetchOutcome::Results { .. } => 100,
        };
        let diffs = batch.outcome.into_diffs();
        let read = diffs.len();

        if let Err(e) = self.session.append(diffs, DiffOrigin::Remote) {
            return self.fail_sync(e);
        }
        let remaining = self.session.unprocessed_len();
        if let Some(active) = self.active_sync.as_mut() {
            active.summary.diffs_read += read;
            active.summary.batches += 1;
            active.pending_ack = Some(PendingAck {
                proposal: batch.proposal,
                partial,
                progress,
                remaining,
            });
        }
        self.schedule_drain();
    }

    fn complete_sync(&mut self) {
        let Some(active) = self.active_sync.take() else {
            return;
        };
        self.emit_progress(SyncProgress::new(SyncStage::Complete, 100));
        self.session.events().emit(&super::ChangeEvent::SyncCompleted {
            diffs_read: active.summary.diffs_read,
            journals_updated: active.summary.journals_updated.clone(),
        });
        let _ = active.reply.send(Ok(active.summary));
    }

    fn fail_sync(&mut self, error: TandemError) {
        let Some(active) = self.active_sync.take() else {
            log::error!("{}", error);
            return;
        };
        self.session.emit_failure(&error);
        let _ = active.reply.send(Err(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncLimits;
    use crate::history::MemoryHistoryStore;
    use crate::journal::JournalDirectory;
    use crate::store::MemoryObjectStore;
    use crate::sync::{BoxFuture, JournalManager, MemoryRemoteStore};
    use crate::history::MergeResult;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Semaphore;

    fn spawn_session(
        dir: &std::path::Path,
        id: &str,
        remote: Arc<dyn RemoteFileStore>,
        progress: Option<mpsc::UnboundedSender<SyncProgress>>,
    ) -> SessionHandle {
        spawn_session_with(dir, id, remote, progress, MemoryObjectStore::new())
    }

    fn spawn_session_with<O: ObjectStore + 'static>(
        dir: &std::path::Path,
        id: &str,
        remote: Arc<dyn RemoteFileStore>,
        progress: Option<mpsc::UnboundedSender<SyncProgress>>,
        objects: O,
    ) -> SessionHandle {
        let limits = SyncLimits {
            read_batch_limit: 10,
            merge_batch_size: 4,
            ..SyncLimits::default()
        };
        let files = Arc::new(JournalDirectory::open(dir.join(id).join("journals")).unwrap());
        let journals = JournalManager::open(files, id, None, limits)
            .unwrap()
            .with_remote(remote);
        let session = Session::new(
            MemoryHistoryStore::new(),
            objects,
            journals,
            limits,
        );
        SessionHandle::spawn(session, progress).unwrap()
    }

    /// Remote whose version listing waits for a permit.
    struct GatedRemote {
        inner: MemoryRemoteStore,
        gate: Arc<Semaphore>,
    }

    impl RemoteFileStore for GatedRemote {
        fn fetch_remote_file_versions(&self) -> BoxFuture<'_, RemoteResult<VersionMap>> {
            Box::pin(async move {
                let _permit = self
                    .gate
                    .acquire()
                    .await
                    .map_err(|_| RemoteRequestFailure::ServerError)?;
                self.inner.fetch_remote_file_versions().await
            })
        }

        fn push(&self, journal_id: &str, contents: Vec<u8>) -> BoxFuture<'_, RemoteResult<String>> {
            self.inner.push(journal_id, contents)
        }

        fn fetch_files(&self, journal_ids: &[String]) -> BoxFuture<'_, RemoteResult<Vec<RemoteFile>>> {
            self.inner.fetch_files(journal_ids)
        }
    }

    /// Object store whose merges fail while `failing` is set.
    struct FailingStore {
        inner: MemoryObjectStore,
        failing: Arc<AtomicBool>,
    }

    impl ObjectStore for FailingStore {
        fn object(&self, identifier: &str) -> Result<Option<DatabaseObject>> {
            self.inner.object(identifier)
        }

        fn apply(&mut self, result: &MergeResult) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(std::io::Error::other("disk full").into());
            }
            self.inner.apply(result)
        }

        fn fetch_more(&self, cursor: &FetchCursor, limit: usize) -> Result<FetchPage> {
            self.inner.fetch_more(cursor, limit)
        }

        fn save(&self, location: &std::path::Path) -> Result<()> {
            self.inner.save(location)
        }
    }

    fn notes(prefix: &str, count: usize) -> Vec<ObjectDiff> {
        (0..count)
            .map(|i| ObjectDiff::insert(format!("{}{:03}", prefix, i), DatabaseObject::new("note")))
            .collect()
    }

    #[tokio::test]
    async fn test_append_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let handle = spawn_session(dir.path(), "a", Arc::new(MemoryRemoteStore::new()), None);

        handle
            .append(vec![ObjectDiff::insert(
                "1",
                DatabaseObject::new("person").with_property("name", "John"),
            )])
            .await
            .unwrap();
        handle.flush().await.unwrap();

        let object = handle.object("1").await.unwrap().unwrap();
        assert_eq!(object.get("name").and_then(|v| v.as_str()), Some("John"));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_many_edits_are_merged_in_batches() {
        let dir = tempfile::tempdir().unwrap();
        let handle = spawn_session(dir.path(), "a", Arc::new(MemoryRemoteStore::new()), None);

        handle.append(notes("n", 25)).await.unwrap();
        handle.flush().await.unwrap();
        assert_eq!(handle.count(Some("note"), None).await.unwrap(), ObjectCount::Exactly(25));

        let page = handle.fetch(None, 10, None).await.unwrap();
        assert_eq!(page.objects.len(), 10);
        let next = handle.fetch_more(page.cursor, 100).await.unwrap();
        assert_eq!(next.objects.len(), 15);
        assert!(next.cursor.no_more_results);
    }

    #[tokio::test]
    async fn test_replicas_converge_through_actor() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemoteStore::new();
        let a = spawn_session(dir.path(), "a", Arc::new(remote.clone()), None);
        let b = spawn_session(dir.path(), "b", Arc::new(remote.clone()), None);

        a.append(notes("a", 23)).await.unwrap();
        a.sync().await.unwrap();

        let summary = b.sync().await.unwrap();
        assert_eq!(summary.journals_updated, vec!["a".to_string()]);
        assert_eq!(summary.diffs_read, 23);
        assert_eq!(b.count(None, None).await.unwrap(), ObjectCount::Exactly(23));
    }

    #[tokio::test]
    async fn test_second_sync_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(Semaphore::new(0));
        let remote = GatedRemote {
            inner: MemoryRemoteStore::new(),
            gate: Arc::clone(&gate),
        };
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let handle = spawn_session(dir.path(), "a", Arc::new(remote), Some(progress_tx));

        let first = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.sync().await })
        };
        let started = progress_rx.recv().await.unwrap();
        assert_eq!(started.stage, SyncStage::ExchangingFiles);

        assert!(matches!(handle.sync().await, Err(TandemError::SyncInProgress)));

        gate.add_permits(1);
        first.await.unwrap().unwrap();

        let mut last = None;
        while let Ok(progress) = progress_rx.try_recv() {
            last = Some(progress);
        }
        assert_eq!(last.map(|p| p.stage), Some(SyncStage::Complete));
    }

    #[tokio::test]
    async fn test_remote_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemoteStore::new();
        remote.set_failure(
            crate::sync::RemoteOperation::FetchVersions,
            Some(RemoteRequestFailure::Unauthorized),
        );
        let handle = spawn_session(dir.path(), "a", Arc::new(remote), None);

        let err = handle.sync().await.unwrap_err();
        assert!(matches!(
            err,
            TandemError::Sync(SyncFailure::FetchRemoteVersionsFailed(
                RemoteRequestFailure::Unauthorized
            ))
        ));
    }

    #[tokio::test]
    async fn test_flush_reports_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let failing = Arc::new(AtomicBool::new(true));
        let store = FailingStore {
            inner: MemoryObjectStore::new(),
            failing: Arc::clone(&failing),
        };
        let handle = spawn_session_with(
            dir.path(),
            "a",
            Arc::new(MemoryRemoteStore::new()),
            None,
            store,
        );

        handle.append(notes("n", 3)).await.unwrap();
        let err = handle.flush().await.unwrap_err();
        assert!(matches!(err, TandemError::Io(_)), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_sync_reports_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let remote = MemoryRemoteStore::new();
        let a = spawn_session(dir.path(), "a", Arc::new(remote.clone()), None);
        a.append(notes("a", 5)).await.unwrap();
        a.sync().await.unwrap();

        let failing = Arc::new(AtomicBool::new(true));
        let store = FailingStore {
            inner: MemoryObjectStore::new(),
            failing: Arc::clone(&failing),
        };
        let b = spawn_session_with(dir.path(), "b", Arc::new(remote), None, store);
        let err = b.sync().await.unwrap_err();
        assert!(matches!(err, TandemError::Io(_)), "unexpected error: {err}");

        // Offsets were not committed, so the next round merges the journal.
        failing.store(false, Ordering::SeqCst);
        let summary = b.sync().await.unwrap();
        assert_eq!(summary.diffs_read, 5);
        assert_eq!(b.count(None, None).await.unwrap(), ObjectCount::Exactly(5));
    }
}
