//! The materialized object set.
//!
//! [`ObjectStore`] holds the objects produced by merges and answers paginated
//! queries over them. Pagination walks a sorted identifier index; a
//! [`FetchCursor`] is a raw position into that index, so inserts and removes
//! between two calls may shift the results.

mod memory_store;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

pub use memory_store::MemoryObjectStore;

use crate::error::Result;
use crate::history::MergeResult;
use crate::model::DatabaseObject;

/// Number of objects scanned by [`ObjectStore::count`] before it gives up
/// on an exact answer.
pub const COUNT_PAGE_SIZE: usize = 1000;

/// Filter applied to candidate objects during a fetch.
pub type Predicate = Arc<dyn Fn(&DatabaseObject) -> bool + Send + Sync>;

/// Continuation token for [`ObjectStore::fetch_more`].
#[derive(Clone, Default)]
pub struct FetchCursor {
    /// Only objects of this type match
    pub object_type: Option<String>,
    /// Position in the sorted identifier index to resume from
    pub next_offset: usize,
    /// Set once the index is exhausted
    pub no_more_results: bool,
    /// Extra filter
    pub predicate: Option<Predicate>,
}

impl FetchCursor {
    /// A cursor at the start of the index.
    pub fn new(object_type: Option<&str>, predicate: Option<Predicate>) -> Self {
        Self {
            object_type: object_type.map(str::to_string),
            next_offset: 0,
            no_more_results: false,
            predicate,
        }
    }

    /// Whether `object` passes the type filter and the predicate.
    pub fn matches(&self, object: &DatabaseObject) -> bool {
        self.object_type
            .as_deref()
            .is_none_or(|object_type| object.object_type == object_type)
            && self.predicate.as_ref().is_none_or(|predicate| predicate(object))
    }
}

impl fmt::Debug for FetchCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchCursor")
            .field("object_type", &self.object_type)
            .field("next_offset", &self.next_offset)
            .field("no_more_results", &self.no_more_results)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

/// One page of fetch results.
#[derive(Debug, Clone)]
pub struct FetchPage {
    /// Matching objects in identifier order
    pub objects: Vec<(String, DatabaseObject)>,
    /// Where the next page starts
    pub cursor: FetchCursor,
}

/// Result of [`ObjectStore::count`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectCount {
    /// The whole index was scanned
    Exactly(usize),
    /// At least this many match; the scan stopped early
    MoreThan(usize),
}

impl fmt::Display for ObjectCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectCount::Exactly(n) => write!(f, "{}", n),
            ObjectCount::MoreThan(n) => write!(f, "more than {}", n),
        }
    }
}

/// Trait for materialized object set backends.
pub trait ObjectStore: Send {
    /// The object with `identifier`, if it exists.
    fn object(&self, identifier: &str) -> Result<Option<DatabaseObject>>;

    /// Apply a merge: add inserted objects, replace updated ones, delete
    /// removed ones.
    fn apply(&mut self, result: &MergeResult) -> Result<()>;

    /// Continue a paginated fetch, collecting at most `limit` objects.
    fn fetch_more(&self, cursor: &FetchCursor, limit: usize) -> Result<FetchPage>;

    /// Persist the store to `location`.
    fn save(&self, location: &Path) -> Result<()>;

    /// Start a paginated fetch.
    fn fetch(
        &self,
        object_type: Option<&str>,
        limit: usize,
        predicate: Option<Predicate>,
    ) -> Result<FetchPage> {
        self.fetch_more(&FetchCursor::new(object_type, predicate), limit)
    }

    /// Approximate count: exact when one page of [`COUNT_PAGE_SIZE`]
    /// objects exhausts the index.
    fn count(&self, object_type: Option<&str>, predicate: Option<Predicate>) -> Result<ObjectCount> {
        let page = self.fetch(object_type, COUNT_PAGE_SIZE, predicate)?;
        Ok(if page.cursor.no_more_results {
            ObjectCount::Exactly(page.objects.len())
        } else {
            ObjectCount::MoreThan(page.objects.len())
        })
    }
}

impl<T: ObjectStore + ?Sized> ObjectStore for Box<T> {
    fn object(&self, identifier: &str) -> Result<Option<DatabaseObject>> {
        (**self).object(identifier)
    }

    fn apply(&mut self, result: &MergeResult) -> Result<()> {
        (**self).apply(result)
    }

    fn fetch_more(&self, cursor: &FetchCursor, limit: usize) -> Result<FetchPage> {
        (**self).fetch_more(cursor, limit)
    }

    fn save(&self, location: &Path) -> Result<()> {
        (**self).save(location)
    }

    fn fetch(
        &self,
        object_type: Option<&str>,
        limit: usize,
        predicate: Option<Predicate>,
    ) -> Result<FetchPage> {
        (**self).fetch(object_type, limit, predicate)
    }

    fn count(&self, object_type: Option<&str>, predicate: Option<Predicate>) -> Result<ObjectCount> {
        (**self).count(object_type, predicate)
    }
}
