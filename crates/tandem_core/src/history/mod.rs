//! Per-object diff histories and the merge engine.
//!
//! - [`ObjectHistoryStore`] persists histories and the pending-update set.
//! - [`ObjectHistoryTracker`] orders incoming diffs into histories and merges
//!   them into a [`MergeResult`].

mod memory_store;
#[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
mod sqlite_store;
mod state;
mod store;
mod tracker;

pub use memory_store::MemoryHistoryStore;
#[cfg(all(not(target_arch = "wasm32"), feature = "sqlite"))]
pub use sqlite_store::SqliteHistoryStore;
pub use state::{ObjectHistoryState, ProcessingState};
pub use store::{ObjectHistoryStore, PendingPersistence};
pub use tracker::{MergeResult, ObjectHistoryTracker};
