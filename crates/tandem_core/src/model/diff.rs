//! The atomic change record.
//!
//! Every mutation of the object set is expressed as an [`ObjectDiff`]: an
//! insert, an update of some properties, or a remove, stamped with the
//! identifier of the object it applies to and the wall-clock instant it was
//! made. Diffs are immutable once created and compare structurally.

use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::object::{DatabaseObject, Properties};

/// Logical timestamp of a diff.
pub type Timestamp = DateTime<Utc>;

/// The current instant, truncated to the millisecond precision journals store.
///
/// Truncating at creation keeps a locally made diff equal to the copy read
/// back from a journal.
pub fn timestamp_now() -> Timestamp {
    Utc::now().trunc_subsecs(3)
}

/// Kind of a diff, as written in the `diffType` field of a journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffType {
    /// Creates an object
    Insert,
    /// Merges properties into an object
    Update,
    /// Deletes an object
    Remove,
}

impl fmt::Display for DiffType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffType::Insert => write!(f, "insert"),
            DiffType::Update => write!(f, "update"),
            DiffType::Remove => write!(f, "remove"),
        }
    }
}

/// A single change to one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    into = "crate::journal::DiffRecord",
    try_from = "crate::journal::DiffRecord"
)]
pub enum ObjectDiff {
    /// Creates the object (or replaces it wholesale).
    Insert {
        /// Object identifier
        identifier: String,
        /// When the change was made
        timestamp: Timestamp,
        /// The full object
        object: DatabaseObject,
    },
    /// Merges `properties` into the existing object, new keys overwriting.
    Update {
        /// Object identifier
        identifier: String,
        /// When the change was made
        timestamp: Timestamp,
        /// Properties to merge
        properties: Properties,
    },
    /// Deletes the object.
    Remove {
        /// Object identifier
        identifier: String,
        /// When the change was made
        timestamp: Timestamp,
    },
}

impl ObjectDiff {
    /// Insert stamped with the current time.
    pub fn insert(identifier: impl Into<String>, object: DatabaseObject) -> Self {
        ObjectDiff::Insert {
            identifier: identifier.into(),
            timestamp: timestamp_now(),
            object,
        }
    }

    /// Update stamped with the current time.
    pub fn update(identifier: impl Into<String>, properties: Properties) -> Self {
        ObjectDiff::Update {
            identifier: identifier.into(),
            timestamp: timestamp_now(),
            properties,
        }
    }

    /// Remove stamped with the current time.
    pub fn remove(identifier: impl Into<String>) -> Self {
        ObjectDiff::Remove {
            identifier: identifier.into(),
            timestamp: timestamp_now(),
        }
    }

    /// Identifier of the object this diff applies to.
    pub fn identifier(&self) -> &str {
        match self {
            ObjectDiff::Insert { identifier, .. }
            | ObjectDiff::Update { identifier, .. }
            | ObjectDiff::Remove { identifier, .. } => identifier,
        }
    }

    /// When the change was made.
    pub fn timestamp(&self) -> Timestamp {
        match self {
            ObjectDiff::Insert { timestamp, .. }
            | ObjectDiff::Update { timestamp, .. }
            | ObjectDiff::Remove { timestamp, .. } => *timestamp,
        }
    }

    /// The kind of change.
    pub fn diff_type(&self) -> DiffType {
        match self {
            ObjectDiff::Insert { .. } => DiffType::Insert,
            ObjectDiff::Update { .. } => DiffType::Update,
            ObjectDiff::Remove { .. } => DiffType::Remove,
        }
    }

    /// Whether this diff creates the object.
    pub fn is_insert(&self) -> bool {
        matches!(self, ObjectDiff::Insert { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::JsonValue;
    use chrono::TimeZone;

    fn at(secs: i64) -> Timestamp {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_equality_is_structural() {
        let object = DatabaseObject::new("person").with_property("name", "John");
        let a = ObjectDiff::Insert {
            identifier: "1".to_string(),
            timestamp: at(10),
            object: object.clone(),
        };
        let b = ObjectDiff::Insert {
            identifier: "1".to_string(),
            timestamp: at(10),
            object,
        };
        assert_eq!(a, b);

        let c = ObjectDiff::Remove {
            identifier: "1".to_string(),
            timestamp: at(10),
        };
        assert_ne!(a, c);
    }

    #[test]
    fn test_accessors() {
        let mut properties = Properties::new();
        properties.insert("age".to_string(), JsonValue::Int(23));
        let diff = ObjectDiff::Update {
            identifier: "42".to_string(),
            timestamp: at(5),
            properties,
        };
        assert_eq!(diff.identifier(), "42");
        assert_eq!(diff.timestamp(), at(5));
        assert_eq!(diff.diff_type(), DiffType::Update);
        assert!(!diff.is_insert());
    }

    #[test]
    fn test_timestamp_now_has_millisecond_precision() {
        let now = timestamp_now();
        assert_eq!(now.timestamp_subsec_nanos() % 1_000_000, 0);
    }
}
