use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for tandem operations
#[derive(Debug, Error)]
pub enum TandemError {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    // Journal errors
    #[error("Invalid journal identifier '{0}'")]
    InvalidJournalId(String),

    #[error("Invalid journal record: {0}")]
    InvalidRecord(String),

    #[error("No record boundary within {scanned} bytes before offset {offset}")]
    UnrecoverableJournalOffset { offset: u64, scanned: u64 },

    #[error("No object with identifier '{0}'")]
    ObjectNotFound(String),

    // Sync errors
    #[error("Sync failed: {0}")]
    Sync(#[from] SyncFailure),

    #[error("A sync is already in progress")]
    SyncInProgress,

    #[error("Merge failed and aborted the running sync")]
    SyncAborted,

    #[error("Session actor is no longer running")]
    SessionClosed,

    // Config errors
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Configuration not initialized. Run 'tandem init' first.")]
    ConfigNotInitialized,
}

/// Result type alias for tandem operations
pub type Result<T> = std::result::Result<T, TandemError>;

/// Failure reported by a [`RemoteFileStore`](crate::sync::RemoteFileStore) request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RemoteRequestFailure {
    #[error("no network connection")]
    NoNetwork,
    #[error("no remote storage provider configured")]
    NoProvider,
    #[error("network error")]
    NetworkError,
    #[error("unauthorized")]
    Unauthorized,
    #[error("server error")]
    ServerError,
    #[error("request timed out")]
    Timeout,
}

/// The stage at which a remote sync round was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SyncFailure {
    #[error("pushing the local journal failed: {0}")]
    PushFailed(RemoteRequestFailure),
    #[error("fetching remote journal versions failed: {0}")]
    FetchRemoteVersionsFailed(RemoteRequestFailure),
    #[error("fetching remote journals failed: {0}")]
    FetchRemoteFilesFailed(RemoteRequestFailure),
}

impl SyncFailure {
    /// The remote request failure behind this sync failure.
    pub fn cause(&self) -> RemoteRequestFailure {
        match self {
            SyncFailure::PushFailed(cause)
            | SyncFailure::FetchRemoteVersionsFailed(cause)
            | SyncFailure::FetchRemoteFilesFailed(cause) => *cause,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_failure_cause() {
        let failure = SyncFailure::PushFailed(RemoteRequestFailure::Timeout);
        assert_eq!(failure.cause(), RemoteRequestFailure::Timeout);
        assert_eq!(
            failure.to_string(),
            "pushing the local journal failed: request timed out"
        );
    }

    #[test]
    fn test_sync_failure_converts_into_tandem_error() {
        let err: TandemError =
            SyncFailure::FetchRemoteFilesFailed(RemoteRequestFailure::Unauthorized).into();
        assert!(matches!(
            err,
            TandemError::Sync(SyncFailure::FetchRemoteFilesFailed(
                RemoteRequestFailure::Unauthorized
            ))
        ));
    }
}
