//! Sync and status command handlers.

use std::path::Path;
use std::sync::Arc;

use tandem_core::config::HistoryBackend;
use tandem_core::session::{ChangeEvent, EventCallback};

use crate::cli::progress::SyncIndicator;
use crate::cli::{block_on, open_session, report};

/// Handle the sync command - push, download and merge.
pub fn handle_sync(config_path: &Path) -> bool {
    let (config, mut session) = match open_session(config_path) {
        Ok(opened) => opened,
        Err(e) => {
            eprintln!("✗ {}", e);
            return false;
        }
    };
    if config.remote_dir.is_none() {
        eprintln!("✗ No remote configured.");
        eprintln!(
            "  Set remote_dir in {} or run 'tandem init --remote <dir> --force'.",
            config_path.display()
        );
        return false;
    }

    let indicator = Arc::new(SyncIndicator::start());
    let on_event: EventCallback = {
        let indicator = Arc::clone(&indicator);
        Arc::new(move |event: &ChangeEvent| match event {
            ChangeEvent::SyncProgress(p) => indicator.show(p),
            ChangeEvent::SyncFailed { .. } => indicator.fail(),
            _ => {}
        })
    };
    let subscription = session.subscribe(on_event);

    let result = block_on(session.sync());
    session.events().unsubscribe(subscription);

    match result {
        Ok(summary) => {
            println!("✓ Sync complete");
            if summary.journals_updated.is_empty() {
                println!("  Journals downloaded: none");
            } else {
                println!(
                    "  Journals downloaded: {}",
                    summary.journals_updated.join(", ")
                );
            }
            println!("  Diffs read: {}", summary.diffs_read);
            report(session.save())
        }
        Err(e) => {
            eprintln!("✗ Sync failed: {}", e);
            false
        }
    }
}

/// Handle the status command - show replica and journal status.
pub fn handle_status(config_path: &Path) -> bool {
    let (config, session) = match open_session(config_path) {
        Ok(opened) => opened,
        Err(e) => {
            eprintln!("✗ {}", e);
            return false;
        }
    };

    println!("Replica Status");
    println!("==============");
    println!();
    println!("Replica ID: {}", config.replica_id);
    println!("Config file: {}", config_path.display());
    println!("Data directory: {}", config.data_dir.display());
    match &config.remote_dir {
        Some(remote) => println!("Remote: {}", remote.display()),
        None => println!("Remote: (not configured)"),
    }
    let backend = match config.history_backend {
        HistoryBackend::Memory => "memory",
        HistoryBackend::Sqlite => "sqlite",
    };
    println!("History backend: {}", backend);

    match session.count(None, None) {
        Ok(count) => println!("Objects: {}", count),
        Err(e) => println!("Objects: (unavailable: {})", e),
    }
    match session.tracker().pending() {
        Ok(pending) => println!("Pending histories: {}", pending.len()),
        Err(e) => println!("Pending histories: (unavailable: {})", e),
    }

    let state = session.journals().state();
    if let Some(version) = &state.last_local_version_pushed {
        println!("Last push: version {}", version);
    } else {
        println!("Last push: (never)");
    }

    println!();
    println!("Journals");
    println!("--------");
    let files = session.journals().files();
    let journals = match files.list_journals() {
        Ok(journals) => journals,
        Err(e) => {
            eprintln!("✗ {}", e);
            return false;
        }
    };
    for id in journals {
        let size = files.journal_size(&id).unwrap_or(0);
        let offset = state.journal_byte_offsets.get(&id).copied().unwrap_or(0);
        let marker = if id == config.replica_id { " (local)" } else { "" };
        println!("{}{}: {} of {} bytes read", id, marker, offset, size);
    }
    true
}
