//! Journal codec.
//!
//! A journal is an append-only file of newline-terminated JSON records, one
//! per [`ObjectDiff`](crate::model::ObjectDiff). Every replica writes its own
//! journal and keeps read-only copies of its peers' journals. Progress through
//! a journal is tracked as a byte offset, never as a record count, because
//! writers append raw bytes while readers are part-way through.

mod files;
mod reader;
mod record;
mod writer;

pub use files::{JOURNAL_EXTENSION, JournalDirectory, JournalFileManaging, validate_journal_id};
pub use reader::{DEFAULT_CHUNK_SIZE, JournalReader, MAX_BACKSCAN, ReadBatch};
pub use record::{DiffRecord, decode_line, encode_line};
pub use writer::JournalWriter;
