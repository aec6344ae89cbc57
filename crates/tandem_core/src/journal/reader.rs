//! Resumable journal reader.
//!
//! Reading is driven by byte offsets. Each call to [`JournalReader::read_next`]
//! is handed the offset returned by the previous call (usually persisted in
//! between) and returns the decoded diffs plus the offset to resume from.
//!
//! The reader never consumes an incomplete trailing line: a writer may be in
//! the middle of appending it, and it is decoded once its newline shows up.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use super::record::decode_line;
use crate::error::{Result, TandemError};
use crate::model::ObjectDiff;

/// Default number of bytes pulled from the journal per read.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// How far back the reader looks for a record boundary when handed an
/// offset that points into the middle of a record.
pub const MAX_BACKSCAN: u64 = 4 * 1024;

/// Records decoded by one [`JournalReader::read_next`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadBatch {
    /// Decoded diffs, in file order
    pub diffs: Vec<ObjectDiff>,
    /// Offset just past the last consumed line
    pub next_offset: u64,
    /// Reading stopped at a record this reader cannot decode. The offset
    /// points at that record, so it is retried on every later read.
    pub stopped_at_unreadable: bool,
}

/// Reads newline-delimited diff records from a journal.
pub struct JournalReader<R> {
    inner: R,
    /// Bytes read from `inner` but not consumed yet. `inner` is positioned at
    /// `buffer_start + buffer.len()` whenever `synced` is set.
    buffer: Vec<u8>,
    buffer_start: u64,
    synced: bool,
    /// Offset known to sit at a record boundary (the last returned offset).
    known_boundary: Option<u64>,
    chunk_size: usize,
}

impl JournalReader<File> {
    /// Open a journal file for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| TandemError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(file))
    }
}

impl<R: Read + Seek> JournalReader<R> {
    /// Wrap a readable, seekable journal source.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            buffer_start: 0,
            synced: false,
            known_boundary: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set the number of bytes pulled from the source per read.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Read up to `max_records` diffs starting at `byte_offset`.
    ///
    /// Fewer records than requested are returned when the end of the journal
    /// is reached. If `byte_offset` points into the middle of a record, the
    /// reader resumes at the start of that record.
    pub fn read_next(&mut self, byte_offset: u64, max_records: usize) -> Result<ReadBatch> {
        let offset = self.resolve_offset(byte_offset)?;
        self.position_at(offset)?;

        let mut diffs = Vec::new();
        let mut consumed = 0usize;
        let mut stopped_at_unreadable = false;

        'read: while diffs.len() < max_records {
            while diffs.len() < max_records {
                let Some(newline) = self.buffer[consumed..].iter().position(|b| *b == b'\n')
                else {
                    break;
                };
                let line = &self.buffer[consumed..consumed + newline];
                if line.iter().all(u8::is_ascii_whitespace) {
                    consumed += newline + 1;
                    continue;
                }
                match decode_line(line) {
                    Ok(diff) => {
                        diffs.push(diff);
                        consumed += newline + 1;
                    }
                    Err(e) => {
                        log::warn!(
                            "Stopping journal read at offset {}: unreadable record ({})",
                            self.buffer_start + consumed as u64,
                            e
                        );
                        stopped_at_unreadable = true;
                        break 'read;
                    }
                }
            }

            if diffs.len() >= max_records || self.fill_buffer()? == 0 {
                break;
            }
        }

        self.buffer.drain(..consumed);
        self.buffer_start += consumed as u64;
        self.known_boundary = Some(self.buffer_start);

        log::debug!(
            "Read {} records from offset {} to {}",
            diffs.len(),
            offset,
            self.buffer_start
        );

        Ok(ReadBatch {
            diffs,
            next_offset: self.buffer_start,
            stopped_at_unreadable,
        })
    }

    /// Map `offset` to the start of the record it falls in.
    ///
    /// Offsets left behind by older writers may point into a record. The
    /// preceding newline is searched for at most [`MAX_BACKSCAN`] bytes back.
    fn resolve_offset(&mut self, offset: u64) -> Result<u64> {
        if offset == 0 || self.known_boundary == Some(offset) {
            return Ok(offset);
        }

        let window_start = offset.saturating_sub(MAX_BACKSCAN);
        let window = self.read_range(window_start, offset)?;
        let scanned = window.len() as u64;
        if scanned < offset - window_start {
            // The journal is shorter than the offset
            return Err(TandemError::UnrecoverableJournalOffset { offset, scanned });
        }

        match window.iter().rposition(|b| *b == b'\n') {
            Some(i) if i + 1 == window.len() => Ok(offset),
            Some(i) => {
                let resolved = window_start + i as u64 + 1;
                log::warn!(
                    "Journal offset {} is inside a record, resuming at {}",
                    offset,
                    resolved
                );
                Ok(resolved)
            }
            None if window_start == 0 => {
                log::warn!(
                    "Journal offset {} is inside the first record, resuming at 0",
                    offset
                );
                Ok(0)
            }
            None => Err(TandemError::UnrecoverableJournalOffset { offset, scanned }),
        }
    }

    /// Read the bytes in `[start, end)`, or fewer if the source ends first.
    fn read_range(&mut self, start: u64, end: u64) -> Result<Vec<u8>> {
        self.inner.seek(SeekFrom::Start(start))?;
        let mut bytes = Vec::with_capacity((end - start) as usize);
        (&mut self.inner).take(end - start).read_to_end(&mut bytes)?;

        self.buffer.clear();
        self.buffer_start = start + bytes.len() as u64;
        self.synced = true;
        Ok(bytes)
    }

    /// Make `buffer_start == offset`, reusing buffered bytes when possible.
    fn position_at(&mut self, offset: u64) -> Result<()> {
        let buffer_end = self.buffer_start + self.buffer.len() as u64;
        if self.synced && offset >= self.buffer_start && offset <= buffer_end {
            self.buffer.drain(..(offset - self.buffer_start) as usize);
        } else {
            self.inner.seek(SeekFrom::Start(offset))?;
            self.buffer.clear();
            self.synced = true;
        }
        self.buffer_start = offset;
        Ok(())
    }

    /// Append up to one chunk from the source. Returns 0 at end of file.
    fn fill_buffer(&mut self) -> Result<usize> {
        let start = self.buffer.len();
        self.buffer.resize(start + self.chunk_size, 0);
        let read = loop {
            match self.inner.read(&mut self.buffer[start..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buffer.truncate(start);
                    return Err(e.into());
                }
            }
        };
        self.buffer.truncate(start + read);
        Ok(read)
    }
}

impl<R> std::fmt::Debug for JournalReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalReader")
            .field("buffer_start", &self.buffer_start)
            .field("buffered", &self.buffer.len())
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::record::encode_line;
    use crate::model::{DatabaseObject, Timestamp};
    use chrono::{TimeZone, Utc};
    use std::io::Cursor;

    fn at(secs: i64) -> Timestamp {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn sample_diffs(count: usize) -> Vec<ObjectDiff> {
        (0..count)
            .map(|i| ObjectDiff::Insert {
                identifier: format!("obj-{}", i),
                timestamp: at(i as i64),
                object: DatabaseObject::new("person").with_property("n", i as i64),
            })
            .collect()
    }

    fn journal_bytes(diffs: &[ObjectDiff]) -> Vec<u8> {
        diffs
            .iter()
            .map(|d| encode_line(d).unwrap())
            .collect::<String>()
            .into_bytes()
    }

    fn read_all(reader: &mut JournalReader<Cursor<Vec<u8>>>, batch: usize) -> Vec<ObjectDiff> {
        let mut offset = 0;
        let mut all = Vec::new();
        loop {
            let result = reader.read_next(offset, batch).unwrap();
            if result.diffs.is_empty() {
                break;
            }
            offset = result.next_offset;
            all.extend(result.diffs);
        }
        all
    }

    #[test]
    fn test_resumable_reads_independent_of_chunk_size() {
        let diffs = sample_diffs(25);
        let bytes = journal_bytes(&diffs);

        for chunk_size in [1, 7, 64, 4096] {
            for batch in [1, 3, 10] {
                let mut reader =
                    JournalReader::new(Cursor::new(bytes.clone())).with_chunk_size(chunk_size);
                assert_eq!(
                    read_all(&mut reader, batch),
                    diffs,
                    "chunk {} batch {}",
                    chunk_size,
                    batch
                );
            }
        }
    }

    #[test]
    fn test_returns_fewer_records_at_end_of_file() {
        let diffs = sample_diffs(3);
        let bytes = journal_bytes(&diffs);
        let len = bytes.len() as u64;
        let mut reader = JournalReader::new(Cursor::new(bytes));

        let result = reader.read_next(0, 10).unwrap();
        assert_eq!(result.diffs.len(), 3);
        assert_eq!(result.next_offset, len);
        assert!(!result.stopped_at_unreadable);

        let again = reader.read_next(result.next_offset, 10).unwrap();
        assert!(again.diffs.is_empty());
        assert_eq!(again.next_offset, len);
    }

    #[test]
    fn test_truncated_trailing_line_is_not_consumed() {
        let diffs = sample_diffs(2);
        let complete = journal_bytes(&diffs[..1]);
        let second = encode_line(&diffs[1]).unwrap().into_bytes();

        let mut bytes = complete.clone();
        bytes.extend_from_slice(&second[..second.len() / 2]);

        let mut reader = JournalReader::new(Cursor::new(bytes.clone())).with_chunk_size(16);
        let result = reader.read_next(0, 10).unwrap();
        assert_eq!(result.diffs, diffs[..1].to_vec());
        assert_eq!(result.next_offset, complete.len() as u64);

        // The writer finishes the line
        bytes.extend_from_slice(&second[second.len() / 2..]);
        let mut reader = JournalReader::new(Cursor::new(bytes)).with_chunk_size(16);
        let result = reader.read_next(complete.len() as u64, 10).unwrap();
        assert_eq!(result.diffs, diffs[1..].to_vec());
    }

    #[test]
    fn test_unknown_record_stops_without_advancing() {
        let diffs = sample_diffs(2);
        let mut bytes = journal_bytes(&diffs[..1]);
        let boundary = bytes.len() as u64;
        bytes.extend_from_slice(
            b"{\"diffType\":\"rename\",\"timestamp\":\"2024-01-01T00:00:00.000Z\",\"identifier\":\"x\"}\n",
        );
        bytes.extend_from_slice(&journal_bytes(&diffs[1..]));

        let mut reader = JournalReader::new(Cursor::new(bytes));
        let result = reader.read_next(0, 10).unwrap();
        assert_eq!(result.diffs, diffs[..1].to_vec());
        assert_eq!(result.next_offset, boundary);
        assert!(result.stopped_at_unreadable);

        let retry = reader.read_next(result.next_offset, 10).unwrap();
        assert!(retry.diffs.is_empty());
        assert_eq!(retry.next_offset, boundary);
        assert!(retry.stopped_at_unreadable);
    }

    #[test]
    fn test_offset_inside_record_resumes_at_record_start() {
        let diffs = sample_diffs(3);
        let first_len = encode_line(&diffs[0]).unwrap().len() as u64;
        let bytes = journal_bytes(&diffs);

        let mut reader = JournalReader::new(Cursor::new(bytes));
        let result = reader.read_next(first_len + 5, 10).unwrap();
        assert_eq!(result.diffs, diffs[1..].to_vec());
    }

    #[test]
    fn test_offset_inside_first_record_resumes_at_zero() {
        let diffs = sample_diffs(2);
        let bytes = journal_bytes(&diffs);
        let mut reader = JournalReader::new(Cursor::new(bytes));
        let result = reader.read_next(3, 10).unwrap();
        assert_eq!(result.diffs, diffs);
    }

    #[test]
    fn test_offset_without_nearby_boundary_is_unrecoverable() {
        let mut bytes = b"{\"diffType\":\"remove\",\"timestamp\":\"2024-01-01T00:00:00.000Z\",\"identifier\":\"".to_vec();
        bytes.extend(std::iter::repeat_n(b'x', 10_000));
        bytes.extend_from_slice(b"\"}\n");

        let mut reader = JournalReader::new(Cursor::new(bytes));
        let err = reader.read_next(9_000, 10).unwrap_err();
        assert!(matches!(
            err,
            TandemError::UnrecoverableJournalOffset { offset: 9_000, .. }
        ));
    }

    #[test]
    fn test_offset_past_end_is_unrecoverable() {
        let bytes = journal_bytes(&sample_diffs(1));
        let len = bytes.len() as u64;
        let mut reader = JournalReader::new(Cursor::new(bytes));
        assert!(reader.read_next(len + 10, 10).is_err());
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let diffs = sample_diffs(2);
        let mut bytes = journal_bytes(&diffs[..1]);
        bytes.extend_from_slice(b"\n  \n");
        bytes.extend_from_slice(&journal_bytes(&diffs[1..]));

        let mut reader = JournalReader::new(Cursor::new(bytes));
        assert_eq!(reader.read_next(0, 10).unwrap().diffs, diffs);
    }
}
