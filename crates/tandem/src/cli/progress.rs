//! Sync progress in the terminal taskbar (OSC 9;4).
//!
//! While files are exchanged the indicator spins. Once merging starts it
//! shows the share of unread journal bytes consumed so far, as reported by
//! each fetch batch. Terminals without support ignore the sequences.

use std::io::{self, Write};
use std::sync::atomic::{AtomicU8, Ordering};

use tandem_core::sync::{SyncProgress, SyncStage};

const CLEAR: &str = "\x1b]9;4;0;0\x07";
const SPINNER: &str = "\x1b]9;4;3\x07";

/// The sequence showing `progress`.
fn render(progress: &SyncProgress) -> String {
    match progress.stage {
        SyncStage::ExchangingFiles => SPINNER.to_string(),
        SyncStage::Merging => format!("\x1b]9;4;1;{}\x07", progress.percent.min(100)),
        SyncStage::Complete => CLEAR.to_string(),
    }
}

/// Red bar frozen at `percent`.
fn render_failure(percent: u8) -> String {
    format!("\x1b]9;4;2;{}\x07", percent.min(100))
}

fn emit(sequence: &str) {
    let mut stderr = io::stderr();
    let _ = stderr.write_all(sequence.as_bytes());
    let _ = stderr.flush();
}

/// Indicator for one sync round. Cleared when dropped.
#[derive(Debug, Default)]
pub struct SyncIndicator {
    merged: AtomicU8,
}

impl SyncIndicator {
    /// Start spinning.
    pub fn start() -> Self {
        emit(SPINNER);
        Self::default()
    }

    pub fn show(&self, progress: &SyncProgress) {
        if progress.stage == SyncStage::Merging {
            self.merged.store(progress.percent.min(100), Ordering::Relaxed);
        }
        emit(&render(progress));
    }

    /// Mark the round failed where merging stopped.
    pub fn fail(&self) {
        emit(&render_failure(self.merged.load(Ordering::Relaxed)));
    }
}

impl Drop for SyncIndicator {
    fn drop(&mut self) {
        emit(CLEAR);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_follows_stage() {
        let exchanging = SyncProgress::new(SyncStage::ExchangingFiles, 40);
        assert_eq!(render(&exchanging), "\x1b]9;4;3\x07");

        let merging = SyncProgress::new(SyncStage::Merging, 42);
        assert_eq!(render(&merging), "\x1b]9;4;1;42\x07");

        let done = SyncProgress::new(SyncStage::Complete, 100);
        assert_eq!(render(&done), CLEAR);
    }

    #[test]
    fn test_failure_keeps_merged_share() {
        let indicator = SyncIndicator::default();
        indicator.show(&SyncProgress::new(SyncStage::Merging, 63));
        indicator.show(&SyncProgress::new(SyncStage::ExchangingFiles, 0));
        assert_eq!(indicator.merged.load(Ordering::Relaxed), 63);
        assert_eq!(render_failure(250), "\x1b]9;4;2;100\x07");
    }
}
