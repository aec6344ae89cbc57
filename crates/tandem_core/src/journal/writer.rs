//! Appending journal writer.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::record::encode_line;
use crate::error::{Result, TandemError};
use crate::model::ObjectDiff;

/// Appends diff records to a journal file.
///
/// Each record is written as one JSON line. Readers may observe a
/// half-written final line at any time; they leave it unconsumed until its
/// newline lands.
#[derive(Debug)]
pub struct JournalWriter {
    file: File,
    path: PathBuf,
}

impl JournalWriter {
    /// Open (creating if needed) a journal for appending.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| TandemError::FileWrite {
                path: path.clone(),
                source,
            })?;
        Ok(Self { file, path })
    }

    /// Path of the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `diffs` and return the new end-of-file byte offset.
    pub fn append(&mut self, diffs: &[ObjectDiff]) -> Result<u64> {
        if diffs.is_empty() {
            return self.len();
        }

        let mut lines = String::new();
        for diff in diffs {
            lines.push_str(&encode_line(diff)?);
        }

        self.file
            .write_all(lines.as_bytes())
            .and_then(|_| self.file.flush())
            .and_then(|_| self.file.sync_data())
            .map_err(|source| TandemError::FileWrite {
                path: self.path.clone(),
                source,
            })?;

        let end = self.len()?;
        log::debug!(
            "Appended {} records to {}, now {} bytes",
            diffs.len(),
            self.path.display(),
            end
        );
        Ok(end)
    }

    /// Current size of the journal in bytes.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Whether the journal holds no bytes.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
