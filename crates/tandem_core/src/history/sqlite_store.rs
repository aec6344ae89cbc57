//! SQLite-backed history store.
//!
//! Histories are kept in three tables: the diffs of every identifier in
//! timestamp order, the processing state per identifier, and the set of
//! identifiers awaiting a merge.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, OptionalExtension, params};

use super::state::{ObjectHistoryState, ProcessingState};
use super::store::{ObjectHistoryStore, PendingPersistence};
use crate::error::{Result, TandemError};
use crate::journal::{decode_line, encode_line};

/// SQLite-backed object history storage.
///
/// # Thread Safety
///
/// The connection is wrapped in a `Mutex`; SQLite itself is used in
/// serialized threading mode.
pub struct SqliteHistoryStore {
    conn: Mutex<Connection>,
    /// Database file, `None` for in-memory stores
    path: Option<PathBuf>,
}

impl SqliteHistoryStore {
    /// Open or create a database at `path`.
    ///
    /// With [`PendingPersistence::Reset`] the pending set is cleared on open.
    pub fn open<P: AsRef<Path>>(path: P, pending: PendingPersistence) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| TandemError::FileWrite {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let store = Self {
            conn: Mutex::new(Connection::open(path)?),
            path: Some(path.to_path_buf()),
        };
        store.init_schema()?;
        if pending == PendingPersistence::Reset {
            store.lock().execute("DELETE FROM pending_updates", [])?;
        }
        Ok(store)
    }

    /// Create an in-memory database. Data is lost when the store is dropped.
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> Result<()> {
        self.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS object_diffs (
                identifier TEXT NOT NULL,
                position INTEGER NOT NULL,
                record TEXT NOT NULL,
                PRIMARY KEY (identifier, position)
            );

            CREATE TABLE IF NOT EXISTS object_history (
                identifier TEXT PRIMARY KEY,
                processing_state TEXT NOT NULL,
                next_index INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS pending_updates (
                identifier TEXT PRIMARY KEY
            );
            "#,
        )?;
        Ok(())
    }
}

fn encode_state(state: ProcessingState) -> (&'static str, i64) {
    match state {
        ProcessingState::FastForward { next_index } => ("fast_forward", next_index as i64),
        ProcessingState::Replay => ("replay", 0),
    }
}

fn decode_state(name: &str, next_index: i64) -> Result<ProcessingState> {
    match name {
        "fast_forward" => Ok(ProcessingState::FastForward {
            next_index: usize::try_from(next_index).map_err(|_| {
                TandemError::InvalidRecord(format!("negative next_index {}", next_index))
            })?,
        }),
        "replay" => Ok(ProcessingState::Replay),
        other => Err(TandemError::InvalidRecord(format!(
            "unknown processing state '{}'",
            other
        ))),
    }
}

impl ObjectHistoryStore for SqliteHistoryStore {
    fn pending_updates(&self) -> Result<BTreeSet<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT identifier FROM pending_updates")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<BTreeSet<_>>>()?;
        Ok(ids)
    }

    fn insert_pending_update(&mut self, identifier: &str) -> Result<()> {
        self.lock().execute(
            "INSERT OR IGNORE INTO pending_updates (identifier) VALUES (?)",
            params![identifier],
        )?;
        Ok(())
    }

    fn remove_pending_update(&mut self, identifier: &str) -> Result<()> {
        self.lock().execute(
            "DELETE FROM pending_updates WHERE identifier = ?",
            params![identifier],
        )?;
        Ok(())
    }

    fn history_for(&self, identifier: &str) -> Result<Option<ObjectHistoryState>> {
        let conn = self.lock();
        let state: Option<(String, i64)> = conn
            .query_row(
                "SELECT processing_state, next_index FROM object_history WHERE identifier = ?",
                params![identifier],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((name, next_index)) = state else {
            return Ok(None);
        };

        let mut stmt = conn
            .prepare("SELECT record FROM object_diffs WHERE identifier = ? ORDER BY position ASC")?;
        let records = stmt
            .query_map(params![identifier], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let diffs = records
            .iter()
            .map(|record| decode_line(record.as_bytes()))
            .collect::<serde_json::Result<Vec<_>>>()?;

        Ok(Some(ObjectHistoryState {
            processing_state: decode_state(&name, next_index)?,
            diffs,
        }))
    }

    fn update(&mut self, state: ObjectHistoryState, identifier: &str) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM object_diffs WHERE identifier = ?",
            params![identifier],
        )?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO object_diffs (identifier, position, record) VALUES (?, ?, ?)",
            )?;
            for (position, diff) in state.diffs.iter().enumerate() {
                let record = encode_line(diff)?;
                insert.execute(params![identifier, position as i64, record.trim_end()])?;
            }
        }
        let (name, next_index) = encode_state(state.processing_state);
        tx.execute(
            "INSERT INTO object_history (identifier, processing_state, next_index)
             VALUES (?, ?, ?)
             ON CONFLICT(identifier) DO UPDATE SET
                processing_state = excluded.processing_state,
                next_index = excluded.next_index",
            params![identifier, name, next_index],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn save(&self, location: &Path) -> Result<()> {
        if self.path.as_deref() == Some(location) {
            // Every write is already committed to this file.
            return Ok(());
        }
        let tmp_path = location.with_extension("tmp");
        if tmp_path.exists() {
            fs::remove_file(&tmp_path).map_err(|source| TandemError::FileWrite {
                path: tmp_path.clone(),
                source,
            })?;
        }
        self.lock().execute(
            "VACUUM INTO ?",
            params![tmp_path.to_string_lossy().into_owned()],
        )?;
        fs::rename(&tmp_path, location).map_err(|source| TandemError::FileWrite {
            path: location.to_path_buf(),
            source,
        })
    }
}

impl std::fmt::Debug for SqliteHistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteHistoryStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
