//! Data model: diffs, objects and scalar values.

mod diff;
mod object;
mod value;

pub use diff::{DiffType, ObjectDiff, Timestamp, timestamp_now};
pub use object::{DatabaseObject, Properties};
pub use value::JsonValue;
