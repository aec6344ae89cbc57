//! In-memory object store with an optional JSON snapshot.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use super::{FetchCursor, FetchPage, ObjectStore};
use crate::error::Result;
use crate::history::MergeResult;
use crate::model::DatabaseObject;
use crate::utils::{read_optional, write_file_atomically};

/// Objects kept in a map plus a sorted identifier index.
#[derive(Debug, Default, Clone)]
pub struct MemoryObjectStore {
    objects: HashMap<String, DatabaseObject>,
    /// Every key of `objects`, sorted
    index: Vec<String>,
}

impl MemoryObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot written by [`ObjectStore::save`]. A missing file
    /// yields an empty store.
    pub fn load(location: &Path) -> Result<Self> {
        let Some(bytes) = read_optional(location)? else {
            return Ok(Self::new());
        };
        let objects: BTreeMap<String, DatabaseObject> = serde_json::from_slice(&bytes)?;
        let index = objects.keys().cloned().collect();
        Ok(Self {
            objects: objects.into_iter().collect(),
            index,
        })
    }

    /// Number of objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store holds no object.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn add(&mut self, identifier: &str, object: &DatabaseObject) {
        if let Err(position) = self.index.binary_search_by(|id| id.as_str().cmp(identifier)) {
            self.index.insert(position, identifier.to_string());
        }
        self.objects.insert(identifier.to_string(), object.clone());
    }

    fn delete(&mut self, identifier: &str) {
        if let Ok(position) = self.index.binary_search_by(|id| id.as_str().cmp(identifier)) {
            self.index.remove(position);
        }
        self.objects.remove(identifier);
    }
}

impl ObjectStore for MemoryObjectStore {
    fn object(&self, identifier: &str) -> Result<Option<DatabaseObject>> {
        Ok(self.objects.get(identifier).cloned())
    }

    fn apply(&mut self, result: &MergeResult) -> Result<()> {
        for (identifier, object) in &result.inserted {
            self.add(identifier, object);
        }
        for (identifier, object) in &result.updated {
            if !self.objects.contains_key(identifier) {
                log::error!("Update of '{}' which is not in the object store", identifier);
                debug_assert!(false, "update of missing object '{}'", identifier);
            }
            self.add(identifier, object);
        }
        for identifier in &result.removed {
            self.delete(identifier);
        }
        debug_assert_eq!(self.index.len(), self.objects.len());
        Ok(())
    }

    fn fetch_more(&self, cursor: &FetchCursor, limit: usize) -> Result<FetchPage> {
        let mut next = cursor.clone();
        let mut objects = Vec::new();
        if cursor.no_more_results {
            return Ok(FetchPage { objects, cursor: next });
        }

        let mut offset = cursor.next_offset;
        while offset < self.index.len() && objects.len() < limit {
            let identifier = &self.index[offset];
            offset += 1;
            match self.objects.get(identifier) {
                Some(object) if cursor.matches(object) => {
                    objects.push((identifier.clone(), object.clone()));
                }
                Some(_) => {}
                None => {
                    log::error!("Index entry '{}' has no object", identifier);
                }
            }
        }

        next.next_offset = offset;
        next.no_more_results = offset >= self.index.len();
        Ok(FetchPage { objects, cursor: next })
    }

    fn save(&self, location: &Path) -> Result<()> {
        let snapshot: BTreeMap<&String, &DatabaseObject> = self.objects.iter().collect();
        write_file_atomically(location, &serde_json::to_vec(&snapshot)?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::{COUNT_PAGE_SIZE, ObjectCount, Predicate};

    fn person(name: &str, age: i64) -> DatabaseObject {
        DatabaseObject::new("person")
            .with_property("name", name)
            .with_property("age", age)
    }

    fn populated() -> MemoryObjectStore {
        let mut result = MergeResult::default();
        result.inserted.insert("c".into(), person("Carol", 40));
        result.inserted.insert("a".into(), person("Alice", 30));
        result.inserted.insert("b".into(), DatabaseObject::new("pet").with_property("name", "Rex"));
        result.inserted.insert("d".into(), person("Dave", 20));
        let mut store = MemoryObjectStore::new();
        store.apply(&result).unwrap();
        store
    }

    fn ids(page: &FetchPage) -> Vec<&str> {
        page.objects.iter().map(|(id, _)| id.as_str()).collect()
    }

    #[test]
    fn test_apply_insert_update_remove() {
        let mut store = populated();

        let mut result = MergeResult::default();
        result.updated.insert("a".into(), person("Alicia", 31));
        result.removed.insert("c".into());
        store.apply(&result).unwrap();

        assert_eq!(store.object("a").unwrap(), Some(person("Alicia", 31)));
        assert!(store.object("c").unwrap().is_none());
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_fetch_pages_in_identifier_order() {
        let store = populated();

        let first = store.fetch(Some("person"), 2, None).unwrap();
        assert_eq!(ids(&first), vec!["a", "c"]);
        assert!(!first.cursor.no_more_results);

        let second = store.fetch_more(&first.cursor, 2).unwrap();
        assert_eq!(ids(&second), vec!["d"]);
        assert!(second.cursor.no_more_results);

        let third = store.fetch_more(&second.cursor, 2).unwrap();
        assert!(third.objects.is_empty());
    }

    #[test]
    fn test_fetch_with_predicate() {
        let store = populated();
        let adults: Predicate = Arc::new(|object: &DatabaseObject| {
            object.get("age").and_then(|age| age.as_i64()).is_some_and(|age| age >= 30)
        });

        let page = store.fetch(None, 10, Some(adults)).unwrap();
        assert_eq!(ids(&page), vec!["a", "c"]);
    }

    #[test]
    fn test_count_exact_and_approximate() {
        let store = populated();
        assert_eq!(store.count(Some("person"), None).unwrap(), ObjectCount::Exactly(3));

        let mut result = MergeResult::default();
        for i in 0..COUNT_PAGE_SIZE + 5 {
            result.inserted.insert(format!("p{:05}", i), person("P", 1));
        }
        let mut big = MemoryObjectStore::new();
        big.apply(&result).unwrap();
        assert_eq!(
            big.count(None, None).unwrap(),
            ObjectCount::MoreThan(COUNT_PAGE_SIZE)
        );
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("objects.json");
        populated().save(&path).unwrap();

        let loaded = MemoryObjectStore::load(&path).unwrap();
        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded.object("d").unwrap(), Some(person("Dave", 20)));
        assert_eq!(ids(&loaded.fetch(None, 10, None).unwrap()), vec!["a", "b", "c", "d"]);
    }
}
