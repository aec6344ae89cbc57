//! On-disk layout of journal files.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, TandemError};

/// File extension of journal files.
pub const JOURNAL_EXTENSION: &str = "journal";

/// Manages where journal files live locally.
///
/// One file exists per journal identifier: the local replica's own journal
/// plus a cached copy of every remote journal pulled so far.
pub trait JournalFileManaging: Send + Sync {
    /// Path of the journal file for `journal_id`.
    fn journal_path(&self, journal_id: &str) -> Result<PathBuf>;

    /// Replace the local copy of a journal with `contents`.
    fn replace_journal(&self, journal_id: &str, contents: &[u8]) -> Result<()>;

    /// Size of the journal in bytes (0 if it does not exist yet).
    fn journal_size(&self, journal_id: &str) -> Result<u64>;

    /// Full contents of the journal (empty if it does not exist yet).
    fn read_journal(&self, journal_id: &str) -> Result<Vec<u8>>;

    /// Identifiers of every journal present locally.
    fn list_journals(&self) -> Result<Vec<String>>;
}

/// Journals stored as `<id>.journal` files inside one directory.
#[derive(Debug, Clone)]
pub struct JournalDirectory {
    root: PathBuf,
}

impl JournalDirectory {
    /// Use (and create if needed) `root` as the journal directory.
    pub fn open<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| TandemError::FileWrite {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    /// The directory holding the journals.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Reject identifiers that cannot be used as a plain file name.
pub fn validate_journal_id(journal_id: &str) -> Result<()> {
    let valid = !journal_id.is_empty()
        && journal_id != "."
        && journal_id != ".."
        && !journal_id.starts_with('.')
        && !journal_id.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(TandemError::InvalidJournalId(journal_id.to_string()))
    }
}

impl JournalFileManaging for JournalDirectory {
    fn journal_path(&self, journal_id: &str) -> Result<PathBuf> {
        validate_journal_id(journal_id)?;
        Ok(self
            .root
            .join(format!("{}.{}", journal_id, JOURNAL_EXTENSION)))
    }

    fn replace_journal(&self, journal_id: &str, contents: &[u8]) -> Result<()> {
        let path = self.journal_path(journal_id)?;
        let tmp_path = self.root.join(format!(".{}.tmp", journal_id));

        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(contents)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &path)
        };
        write().map_err(|source| TandemError::FileWrite {
            path: path.clone(),
            source,
        })?;

        log::debug!(
            "Replaced journal '{}' ({} bytes)",
            journal_id,
            contents.len()
        );
        Ok(())
    }

    fn journal_size(&self, journal_id: &str) -> Result<u64> {
        let path = self.journal_path(journal_id)?;
        match fs::metadata(&path) {
            Ok(metadata) => Ok(metadata.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(source) => Err(TandemError::FileRead { path, source }),
        }
    }

    fn read_journal(&self, journal_id: &str) -> Result<Vec<u8>> {
        let path = self.journal_path(journal_id)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(TandemError::FileRead { path, source }),
        }
    }

    fn list_journals(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(JOURNAL_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && validate_journal_id(stem).is_ok()
            {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_journal_id() {
        assert!(validate_journal_id("device-1").is_ok());
        assert!(validate_journal_id("").is_err());
        assert!(validate_journal_id("..").is_err());
        assert!(validate_journal_id("a/b").is_err());
        assert!(validate_journal_id(".hidden").is_err());
    }

    #[test]
    fn test_replace_and_read_journal() {
        let dir = tempfile::tempdir().unwrap();
        let journals = JournalDirectory::open(dir.path().join("journals")).unwrap();

        assert_eq!(journals.journal_size("peer").unwrap(), 0);
        assert!(journals.read_journal("peer").unwrap().is_empty());

        journals.replace_journal("peer", b"first\n").unwrap();
        journals.replace_journal("peer", b"first\nsecond\n").unwrap();

        assert_eq!(journals.read_journal("peer").unwrap(), b"first\nsecond\n");
        assert_eq!(journals.journal_size("peer").unwrap(), 13);
    }

    #[test]
    fn test_list_journals_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let journals = JournalDirectory::open(dir.path()).unwrap();
        journals.replace_journal("b", b"").unwrap();
        journals.replace_journal("a", b"").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        assert_eq!(journals.list_journals().unwrap(), vec!["a", "b"]);
    }
}
