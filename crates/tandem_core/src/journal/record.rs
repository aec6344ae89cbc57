//! Flat JSON record written for each diff.
//!
//! ```text
//! {"diffType":"insert","timestamp":"2024-05-01T10:00:00.000Z","identifier":"1","type":"person","properties":{"name":"John"}}
//! {"diffType":"update","timestamp":"2024-05-01T10:00:01.000Z","identifier":"1","properties":{"name":"Fred"}}
//! {"diffType":"remove","timestamp":"2024-05-01T10:00:02.000Z","identifier":"1"}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::TandemError;
use crate::model::{DatabaseObject, DiffType, ObjectDiff, Properties, Timestamp};

/// Wire representation of an [`ObjectDiff`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffRecord {
    /// insert, update or remove
    pub diff_type: DiffType,

    /// ISO-8601 instant with millisecond precision
    #[serde(with = "iso8601")]
    pub timestamp: Timestamp,

    /// Object identifier
    pub identifier: String,

    /// Object type (insert only)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,

    /// Properties (insert and update only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
}

impl From<ObjectDiff> for DiffRecord {
    fn from(diff: ObjectDiff) -> Self {
        match diff {
            ObjectDiff::Insert {
                identifier,
                timestamp,
                object,
            } => DiffRecord {
                diff_type: DiffType::Insert,
                timestamp,
                identifier,
                object_type: Some(object.object_type),
                properties: Some(object.properties),
            },
            ObjectDiff::Update {
                identifier,
                timestamp,
                properties,
            } => DiffRecord {
                diff_type: DiffType::Update,
                timestamp,
                identifier,
                object_type: None,
                properties: Some(properties),
            },
            ObjectDiff::Remove {
                identifier,
                timestamp,
            } => DiffRecord {
                diff_type: DiffType::Remove,
                timestamp,
                identifier,
                object_type: None,
                properties: None,
            },
        }
    }
}

impl TryFrom<DiffRecord> for ObjectDiff {
    type Error = TandemError;

    fn try_from(record: DiffRecord) -> Result<Self, Self::Error> {
        let DiffRecord {
            diff_type,
            timestamp,
            identifier,
            object_type,
            properties,
        } = record;

        match diff_type {
            DiffType::Insert => {
                let object_type = object_type.ok_or_else(|| {
                    TandemError::InvalidRecord(format!("insert of '{}' has no type", identifier))
                })?;
                Ok(ObjectDiff::Insert {
                    identifier,
                    timestamp,
                    object: DatabaseObject::with_properties(
                        object_type,
                        properties.unwrap_or_default(),
                    ),
                })
            }
            DiffType::Update => Ok(ObjectDiff::Update {
                identifier,
                timestamp,
                properties: properties.unwrap_or_default(),
            }),
            DiffType::Remove => Ok(ObjectDiff::Remove {
                identifier,
                timestamp,
            }),
        }
    }
}

/// Encode a diff as one journal line, newline included.
pub fn encode_line(diff: &ObjectDiff) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(diff)?;
    line.push('\n');
    Ok(line)
}

/// Decode one journal line (without its newline).
pub fn decode_line(line: &[u8]) -> serde_json::Result<ObjectDiff> {
    serde_json::from_slice(line)
}

/// Timestamps are stored with millisecond precision. Finer input is
/// truncated on decode, so a record decodes to the same diff however often it
/// is written back.
mod iso8601 {
    use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&timestamp.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc).trunc_subsecs(3))
            .map_err(|e| D::Error::custom(format!("invalid timestamp '{}': {}", raw, e)))
    }
}
