//! Configuration types for tandem.
//!
//! This module provides the [`Config`] struct which describes one local
//! replica: where its data lives, its journal identifier and the remote it
//! syncs through. Configuration is persisted as TOML (typically at
//! `~/.config/tandem/config.toml` on Unix systems).
//!
//! # Example
//!
//! ```ignore
//! use tandem_core::config::Config;
//! use std::path::PathBuf;
//!
//! let config = Config::new(PathBuf::from("/home/user/tandem"));
//! config.save()?;
//!
//! let journals = config.journals_dir();
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TandemError};
use crate::history::PendingPersistence;
use crate::journal::DEFAULT_CHUNK_SIZE;

/// Default cap on diffs read across all journals per fetch.
pub const DEFAULT_READ_BATCH_LIMIT: usize = 1000;

/// Default number of diffs merged per session batch.
pub const DEFAULT_MERGE_BATCH_SIZE: usize = 100;

/// Which [`ObjectHistoryStore`](crate::history::ObjectHistoryStore) backs a replica.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryBackend {
    /// In memory, snapshotted to JSON
    #[default]
    Memory,
    /// SQLite database
    Sqlite,
}

/// Batch sizes used while syncing and merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncLimits {
    /// Maximum diffs returned by one journal fetch
    pub read_batch_limit: usize,
    /// Maximum diffs merged before yielding to other work
    pub merge_batch_size: usize,
    /// Bytes read from a journal file at a time
    pub reader_chunk_size: usize,
}

impl Default for SyncLimits {
    fn default() -> Self {
        Self {
            read_batch_limit: DEFAULT_READ_BATCH_LIMIT,
            merge_batch_size: DEFAULT_MERGE_BATCH_SIZE,
            reader_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

fn default_read_batch_limit() -> usize {
    DEFAULT_READ_BATCH_LIMIT
}

fn default_merge_batch_size() -> usize {
    DEFAULT_MERGE_BATCH_SIZE
}

fn default_reader_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

/// `Config` describes one local replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding journals, sync state and store snapshots
    pub data_dir: PathBuf,

    /// Identifier of this replica's journal
    pub replica_id: String,

    /// Shared directory used as the remote (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_dir: Option<PathBuf>,

    /// Maximum diffs read per journal fetch
    #[serde(default = "default_read_batch_limit")]
    pub read_batch_limit: usize,

    /// Maximum diffs merged per batch
    #[serde(default = "default_merge_batch_size")]
    pub merge_batch_size: usize,

    /// Journal read chunk size in bytes
    #[serde(default = "default_reader_chunk_size")]
    pub reader_chunk_size: usize,

    /// Whether pending updates survive a restart
    #[serde(default)]
    pub pending_updates: PendingPersistence,

    /// History store backend
    #[serde(default)]
    pub history_backend: HistoryBackend,
}

impl Config {
    /// Create a config for a new replica with a fresh identifier.
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            replica_id: uuid::Uuid::new_v4().to_string(),
            remote_dir: None,
            read_batch_limit: DEFAULT_READ_BATCH_LIMIT,
            merge_batch_size: DEFAULT_MERGE_BATCH_SIZE,
            reader_chunk_size: DEFAULT_CHUNK_SIZE,
            pending_updates: PendingPersistence::default(),
            history_backend: HistoryBackend::default(),
        }
    }

    /// Batch sizes derived from this config.
    pub fn limits(&self) -> SyncLimits {
        SyncLimits {
            read_batch_limit: self.read_batch_limit.max(1),
            merge_batch_size: self.merge_batch_size.max(1),
            reader_chunk_size: self.reader_chunk_size.max(1),
        }
    }

    /// Directory of the journal files
    pub fn journals_dir(&self) -> PathBuf {
        self.data_dir.join("journals")
    }

    /// File holding the sync bookkeeping
    pub fn sync_state_path(&self) -> PathBuf {
        self.data_dir.join("sync_state.json")
    }

    /// File holding the history store
    pub fn history_path(&self) -> PathBuf {
        match self.history_backend {
            HistoryBackend::Memory => self.data_dir.join("history.json"),
            HistoryBackend::Sqlite => self.data_dir.join("history.sqlite"),
        }
    }

    /// File holding the materialized objects
    pub fn objects_path(&self) -> PathBuf {
        self.data_dir.join("objects.json")
    }

    /// Load config from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TandemError::ConfigNotInitialized);
            }
            Err(source) => {
                return Err(TandemError::FileRead {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Ok(toml::from_str(&contents)?)
    }

    /// Save config to an explicit path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents).map_err(|source| TandemError::FileWrite {
            path: path.to_path_buf(),
            source,
        })
    }
}

// ============================================================================
// Native-only implementation (not available in WASM)
// ============================================================================

#[cfg(not(target_arch = "wasm32"))]
impl Config {
    /// Get the config file path (~/.config/tandem/config.toml)
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("tandem").join("config.toml"))
            .ok_or(TandemError::NoConfigDir)
    }

    /// Default data directory (~/.local/share/tandem on Linux)
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tandem")
    }

    /// Load config from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()?)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path()?)
    }
}
