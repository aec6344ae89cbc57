//! Materialized objects and the folds that build them from diffs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::diff::ObjectDiff;
use super::value::JsonValue;

/// Property bag of an object. Key order carries no meaning.
pub type Properties = BTreeMap<String, JsonValue>;

/// An immutable typed, keyed property bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseObject {
    /// Object type, e.g. `"person"`
    #[serde(rename = "type")]
    pub object_type: String,

    /// Object properties
    #[serde(default)]
    pub properties: Properties,
}

impl DatabaseObject {
    /// Create an object of the given type with no properties.
    pub fn new(object_type: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            properties: Properties::new(),
        }
    }

    /// Create an object from a type and a property map.
    pub fn with_properties(object_type: impl Into<String>, properties: Properties) -> Self {
        Self {
            object_type: object_type.into(),
            properties,
        }
    }

    /// Builder-style property setter.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Look up a property.
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.properties.get(key)
    }

    /// Right-biased union: keys in `properties` overwrite existing ones.
    fn merge(&mut self, properties: &Properties) {
        for (key, value) in properties {
            self.properties.insert(key.clone(), value.clone());
        }
    }

    /// Materialize an object from scratch by folding `diffs` in order.
    ///
    /// Returns `None` if the fold ends with the object not existing.
    pub fn create_from(diffs: &[ObjectDiff]) -> Option<Self> {
        Self::update_from(None, diffs)
    }

    /// Fold `diffs` onto `base`.
    ///
    /// - `Insert` sets type and properties wholesale.
    /// - `Update` merges its properties into the live object.
    /// - `Remove` leaves no live object.
    ///
    /// Diffs after a `Remove` follow last-writer-wins: a later `Insert`
    /// recreates the object, while a later `Update` has nothing to merge into
    /// and is skipped.
    pub fn update_from(base: Option<Self>, diffs: &[ObjectDiff]) -> Option<Self> {
        let mut current = base;
        let mut removed = false;

        for diff in diffs {
            match diff {
                ObjectDiff::Insert {
                    identifier, object, ..
                } => {
                    if removed {
                        log::warn!("Insert of '{}' follows a remove, recreating it", identifier);
                    }
                    current = Some(object.clone());
                }
                ObjectDiff::Update {
                    identifier,
                    properties,
                    ..
                } => match current.as_mut() {
                    Some(object) => object.merge(properties),
                    None => {
                        log::warn!("Update of '{}' has no live object, skipping", identifier);
                    }
                },
                ObjectDiff::Remove { .. } => {
                    current = None;
                    removed = true;
                }
            }
        }

        current
    }
}
