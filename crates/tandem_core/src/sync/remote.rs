//! Remote file exchange.
//!
//! The core never talks to a network itself: journals are exchanged with a
//! [`RemoteFileStore`], which only has to list versions, accept the local
//! journal and hand back copies of other journals. Version tokens are opaque
//! and only compared for equality.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::UNIX_EPOCH;

use crate::error::RemoteRequestFailure;
use crate::journal::{JOURNAL_EXTENSION, validate_journal_id};

/// A boxed future used by the remote collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of one remote request.
pub type RemoteResult<T> = std::result::Result<T, RemoteRequestFailure>;

/// Journal identifier to version token.
pub type VersionMap = BTreeMap<String, String>;

/// A journal downloaded from the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Journal identifier
    pub journal_id: String,
    /// Full journal contents
    pub contents: Vec<u8>,
    /// Version token of this copy
    pub version: String,
}

/// Trait for the storage that journals are exchanged through.
pub trait RemoteFileStore: Send + Sync {
    /// Version token of every journal on the remote.
    fn fetch_remote_file_versions(&self) -> BoxFuture<'_, RemoteResult<VersionMap>>;

    /// Upload the full contents of a journal, returning its new version.
    fn push(&self, journal_id: &str, contents: Vec<u8>) -> BoxFuture<'_, RemoteResult<String>>;

    /// Download the given journals.
    fn fetch_files(&self, journal_ids: &[String]) -> BoxFuture<'_, RemoteResult<Vec<RemoteFile>>>;
}

/// One kind of request a [`MemoryRemoteStore`] answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOperation {
    /// [`RemoteFileStore::fetch_remote_file_versions`]
    FetchVersions,
    /// [`RemoteFileStore::push`]
    Push,
    /// [`RemoteFileStore::fetch_files`]
    FetchFiles,
}

#[derive(Debug, Default)]
struct MemoryRemoteInner {
    files: BTreeMap<String, (Vec<u8>, String)>,
    next_version: u64,
    failures: HashMap<RemoteOperation, RemoteRequestFailure>,
    requests: HashMap<RemoteOperation, usize>,
}

/// Remote kept in memory. Clones share the same files, so several replicas
/// in one process can sync through it.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemoteStore {
    inner: Arc<Mutex<MemoryRemoteInner>>,
}

impl MemoryRemoteStore {
    /// Create an empty remote.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryRemoteInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every `operation` request fail with `failure`, or succeed again
    /// with `None`.
    pub fn set_failure(&self, operation: RemoteOperation, failure: Option<RemoteRequestFailure>) {
        let mut inner = self.lock();
        match failure {
            Some(failure) => inner.failures.insert(operation, failure),
            None => inner.failures.remove(&operation),
        };
    }

    /// How many `operation` requests were made, failed ones included.
    pub fn request_count(&self, operation: RemoteOperation) -> usize {
        self.lock().requests.get(&operation).copied().unwrap_or(0)
    }

    /// Contents currently stored for `journal_id`.
    pub fn contents(&self, journal_id: &str) -> Option<Vec<u8>> {
        self.lock().files.get(journal_id).map(|(contents, _)| contents.clone())
    }

    /// Store `contents` as if another replica had pushed it.
    pub fn put(&self, journal_id: &str, contents: Vec<u8>) -> String {
        self.lock().store(journal_id, contents)
    }

    fn begin(&self, operation: RemoteOperation) -> RemoteResult<MutexGuard<'_, MemoryRemoteInner>> {
        let mut inner = self.lock();
        *inner.requests.entry(operation).or_default() += 1;
        if let Some(failure) = inner.failures.get(&operation).copied() {
            return Err(failure);
        }
        Ok(inner)
    }
}

impl MemoryRemoteInner {
    fn store(&mut self, journal_id: &str, contents: Vec<u8>) -> String {
        self.next_version += 1;
        let version = self.next_version.to_string();
        self.files
            .insert(journal_id.to_string(), (contents, version.clone()));
        version
    }
}

impl RemoteFileStore for MemoryRemoteStore {
    fn fetch_remote_file_versions(&self) -> BoxFuture<'_, RemoteResult<VersionMap>> {
        let result = self.begin(RemoteOperation::FetchVersions).map(|inner| {
            inner
                .files
                .iter()
                .map(|(id, (_, version))| (id.clone(), version.clone()))
                .collect()
        });
        Box::pin(async move { result })
    }

    fn push(&self, journal_id: &str, contents: Vec<u8>) -> BoxFuture<'_, RemoteResult<String>> {
        let result = self
            .begin(RemoteOperation::Push)
            .map(|mut inner| inner.store(journal_id, contents));
        Box::pin(async move { result })
    }

    fn fetch_files(&self, journal_ids: &[String]) -> BoxFuture<'_, RemoteResult<Vec<RemoteFile>>> {
        let result = self.begin(RemoteOperation::FetchFiles).map(|inner| {
            journal_ids
                .iter()
                .filter_map(|id| {
                    inner.files.get(id).map(|(contents, version)| RemoteFile {
                        journal_id: id.clone(),
                        contents: contents.clone(),
                        version: version.clone(),
                    })
                })
                .collect()
        });
        Box::pin(async move { result })
    }
}

/// Remote backed by a shared directory, such as a folder kept in sync by a
/// file hosting client. Journals live there as `<id>.journal`.
///
/// Version tokens are `"<mtime-millis>-<size>"`.
#[derive(Debug, Clone)]
pub struct DirectoryRemoteStore {
    root: PathBuf,
}

impl DirectoryRemoteStore {
    /// Use `root` as the shared directory. It must already exist.
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// The shared directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn journal_path(&self, journal_id: &str) -> RemoteResult<PathBuf> {
        validate_journal_id(journal_id).map_err(|_| RemoteRequestFailure::ServerError)?;
        Ok(self
            .root
            .join(format!("{}.{}", journal_id, JOURNAL_EXTENSION)))
    }

    fn versions(&self) -> RemoteResult<VersionMap> {
        let entries = fs::read_dir(&self.root).map_err(|e| failure_for(&self.root, e))?;
        let mut versions = VersionMap::new();
        for entry in entries {
            let path = entry.map_err(|e| failure_for(&self.root, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(JOURNAL_EXTENSION) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if validate_journal_id(id).is_err() {
                continue;
            }
            versions.insert(id.to_string(), version_of(&path)?);
        }
        Ok(versions)
    }

    fn write(&self, journal_id: &str, contents: &[u8]) -> RemoteResult<String> {
        let path = self.journal_path(journal_id)?;
        let tmp_path = self.root.join(format!(".{}.tmp", journal_id));
        fs::write(&tmp_path, contents).map_err(|e| failure_for(&tmp_path, e))?;
        fs::rename(&tmp_path, &path).map_err(|e| failure_for(&path, e))?;
        version_of(&path)
    }

    fn read(&self, journal_ids: &[String]) -> RemoteResult<Vec<RemoteFile>> {
        let mut files = Vec::with_capacity(journal_ids.len());
        for id in journal_ids {
            let path = self.journal_path(id)?;
            let contents = match fs::read(&path) {
                Ok(contents) => contents,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(failure_for(&path, e)),
            };
            files.push(RemoteFile {
                journal_id: id.clone(),
                version: version_of(&path)?,
                contents,
            });
        }
        Ok(files)
    }
}

fn version_of(path: &Path) -> RemoteResult<String> {
    let metadata = fs::metadata(path).map_err(|e| failure_for(path, e))?;
    let modified = metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|since| since.as_millis())
        .unwrap_or(0);
    Ok(format!("{}-{}", modified, metadata.len()))
}

fn failure_for(path: &Path, error: std::io::Error) -> RemoteRequestFailure {
    log::warn!("Remote directory request on '{}' failed: {}", path.display(), error);
    match error.kind() {
        ErrorKind::NotFound => RemoteRequestFailure::NoProvider,
        ErrorKind::PermissionDenied => RemoteRequestFailure::Unauthorized,
        ErrorKind::TimedOut => RemoteRequestFailure::Timeout,
        _ => RemoteRequestFailure::ServerError,
    }
}

/// Run blocking filesystem work off the async thread when a tokio runtime is
/// driving the future. Without one the work runs inline.
#[cfg(all(not(target_arch = "wasm32"), feature = "actor"))]
async fn run_blocking<T, F>(task: F) -> RemoteResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> RemoteResult<T> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle.spawn_blocking(task).await.unwrap_or_else(|e| {
            log::error!("Remote directory task did not finish: {}", e);
            Err(RemoteRequestFailure::ServerError)
        }),
        Err(_) => task(),
    }
}

#[cfg(not(all(not(target_arch = "wasm32"), feature = "actor")))]
async fn run_blocking<T, F>(task: F) -> RemoteResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> RemoteResult<T> + Send + 'static,
{
    task()
}

impl RemoteFileStore for DirectoryRemoteStore {
    fn fetch_remote_file_versions(&self) -> BoxFuture<'_, RemoteResult<VersionMap>> {
        let store = self.clone();
        Box::pin(run_blocking(move || store.versions()))
    }

    fn push(&self, journal_id: &str, contents: Vec<u8>) -> BoxFuture<'_, RemoteResult<String>> {
        let store = self.clone();
        let journal_id = journal_id.to_string();
        Box::pin(run_blocking(move || store.write(&journal_id, &contents)))
    }

    fn fetch_files(&self, journal_ids: &[String]) -> BoxFuture<'_, RemoteResult<Vec<RemoteFile>>> {
        let store = self.clone();
        let journal_ids = journal_ids.to_vec();
        Box::pin(run_blocking(move || store.read(&journal_ids)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_lite::future::block_on;

    #[test]
    fn test_memory_remote_versions_change_on_push() {
        let remote = MemoryRemoteStore::new();
        let v1 = block_on(remote.push("a", b"one\n".to_vec())).unwrap();
        let v2 = block_on(remote.push("a", b"one\ntwo\n".to_vec())).unwrap();
        assert_ne!(v1, v2);

        let versions = block_on(remote.fetch_remote_file_versions()).unwrap();
        assert_eq!(versions.get("a"), Some(&v2));
        assert_eq!(remote.contents("a").unwrap(), b"one\ntwo\n");
    }

    #[test]
    fn test_memory_remote_clones_share_files() {
        let remote = MemoryRemoteStore::new();
        let other = remote.clone();
        other.put("b", b"x\n".to_vec());

        let files = block_on(remote.fetch_files(&["b".to_string(), "missing".to_string()])).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].journal_id, "b");
    }

    #[test]
    fn test_memory_remote_failure_injection() {
        let remote = MemoryRemoteStore::new();
        remote.set_failure(RemoteOperation::Push, Some(RemoteRequestFailure::NoNetwork));
        assert_eq!(
            block_on(remote.push("a", Vec::new())),
            Err(RemoteRequestFailure::NoNetwork)
        );
        assert_eq!(remote.request_count(RemoteOperation::Push), 1);

        remote.set_failure(RemoteOperation::Push, None);
        assert!(block_on(remote.push("a", Vec::new())).is_ok());
    }

    #[test]
    fn test_directory_remote_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let remote = DirectoryRemoteStore::new(dir.path());
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let version = block_on(remote.push("phone", b"line\n".to_vec())).unwrap();
        assert!(version.ends_with("-5"));

        let versions = block_on(remote.fetch_remote_file_versions()).unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions.get("phone"), Some(&version));

        let files = block_on(remote.fetch_files(&["phone".to_string()])).unwrap();
        assert_eq!(files[0].contents, b"line\n");
        assert_eq!(files[0].version, version);
    }

    #[cfg(feature = "actor")]
    #[tokio::test]
    async fn test_directory_remote_inside_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let remote = DirectoryRemoteStore::new(dir.path());

        let version = remote.push("laptop", b"a\nb\n".to_vec()).await.unwrap();
        let versions = remote.fetch_remote_file_versions().await.unwrap();
        assert_eq!(versions.get("laptop"), Some(&version));

        let files = remote.fetch_files(&["laptop".to_string()]).await.unwrap();
        assert_eq!(files[0].contents, b"a\nb\n");
        assert!(!dir.path().join(".laptop.tmp").exists());
    }

    #[test]
    fn test_directory_remote_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let remote = DirectoryRemoteStore::new(dir.path().join("absent"));
        assert_eq!(
            block_on(remote.fetch_remote_file_versions()),
            Err(RemoteRequestFailure::NoProvider)
        );
    }
}
