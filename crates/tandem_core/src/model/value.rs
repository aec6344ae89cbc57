//! Scalar property values.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A scalar JSON value stored in an object property.
///
/// Nested arrays and objects are not representable. A record carrying one
/// fails to decode, which the journal reader treats like any other record
/// it does not understand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonValue {
    /// `null`
    Null,
    /// `true` / `false`
    Bool(bool),
    /// Integral number
    Int(i64),
    /// Floating point number
    Double(f64),
    /// UTF-8 string
    String(String),
}

impl JsonValue {
    /// Parse a command-line style value: JSON scalars are recognised, anything
    /// else is taken as a plain string.
    ///
    /// `"23"` becomes `Int(23)`, `"true"` becomes `Bool(true)`, `"\"23\""`
    /// becomes `String("23")` and `John` becomes `String("John")`.
    pub fn parse_lenient(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_else(|_| JsonValue::String(raw.to_string()))
    }

    /// Returns the string content, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            JsonValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer content, if this is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            JsonValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Whether this is `null`.
    pub fn is_null(&self) -> bool {
        matches!(self, JsonValue::Null)
    }
}

impl fmt::Display for JsonValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonValue::Null => write!(f, "null"),
            JsonValue::Bool(b) => write!(f, "{}", b),
            JsonValue::Int(n) => write!(f, "{}", n),
            JsonValue::Double(d) => write!(f, "{}", d),
            JsonValue::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for JsonValue {
    fn from(value: &str) -> Self {
        JsonValue::String(value.to_string())
    }
}

impl From<String> for JsonValue {
    fn from(value: String) -> Self {
        JsonValue::String(value)
    }
}

impl From<i64> for JsonValue {
    fn from(value: i64) -> Self {
        JsonValue::Int(value)
    }
}

impl From<i32> for JsonValue {
    fn from(value: i32) -> Self {
        JsonValue::Int(value.into())
    }
}

impl From<f64> for JsonValue {
    fn from(value: f64) -> Self {
        JsonValue::Double(value)
    }
}

impl From<bool> for JsonValue {
    fn from(value: bool) -> Self {
        JsonValue::Bool(value)
    }
}
