//! Journal dump command handler

use std::path::Path;

use tandem_core::Result;
use tandem_core::config::Config;
use tandem_core::journal::{JournalDirectory, JournalFileManaging, JournalReader, encode_line};

use crate::cli::report;

/// Print up to `limit` records of journal `id` starting at byte `offset`.
/// Records go to stdout as journal lines, the resume offset to stderr.
pub fn handle_journal(config_path: &Path, id: Option<String>, offset: u64, limit: usize) -> bool {
    report(dump(config_path, id, offset, limit))
}

fn dump(config_path: &Path, id: Option<String>, offset: u64, limit: usize) -> Result<()> {
    let config = Config::load_from(config_path)?;
    let id = id.unwrap_or_else(|| config.replica_id.clone());
    let files = JournalDirectory::open(config.journals_dir())?;
    let path = files.journal_path(&id)?;

    let mut reader =
        JournalReader::open(&path)?.with_chunk_size(config.limits().reader_chunk_size);
    let batch = reader.read_next(offset, limit.max(1))?;
    for diff in &batch.diffs {
        print!("{}", encode_line(diff)?);
    }

    eprintln!(
        "{} records, next offset {} of {}",
        batch.diffs.len(),
        batch.next_offset,
        files.journal_size(&id)?
    );
    if batch.stopped_at_unreadable {
        eprintln!("Stopped at a record this version cannot read.");
    }
    Ok(())
}
