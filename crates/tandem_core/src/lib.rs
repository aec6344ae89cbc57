#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Configuration options
pub mod config;

/// Error (common error types)
pub mod error;

/// Object histories and the merge algorithm
pub mod history;

/// Append-only journal files
pub mod journal;

/// Objects, values and diffs
pub mod model;

/// Change-tracking session (local edits, merges and sync rounds)
pub mod session;

/// Materialized object set
pub mod store;

/// Journal exchange with remote storage
pub mod sync;

pub(crate) mod utils;

pub use error::{RemoteRequestFailure, Result, SyncFailure, TandemError};
