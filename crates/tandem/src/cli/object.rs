//! Object command handlers

use std::path::Path;
use std::sync::Arc;

use tandem_core::model::{DatabaseObject, JsonValue, ObjectDiff, Properties};
use tandem_core::session::{DiffOrigin, ReplicaSession};
use tandem_core::store::Predicate;
use tandem_core::{Result, TandemError};

use crate::cli::{open_session, report};

/// Page size used while listing
const LIST_PAGE_SIZE: usize = 100;

pub fn handle_insert(
    config_path: &Path,
    id: &str,
    object_type: &str,
    set: Vec<(String, JsonValue)>,
) -> bool {
    let object = DatabaseObject::with_properties(object_type, set.into_iter().collect());
    let result = open_session(config_path)
        .and_then(|(_, mut session)| commit_local(&mut session, ObjectDiff::insert(id, object)));
    if !report(result) {
        return false;
    }
    println!("✓ Inserted {}", id);
    true
}

pub fn handle_update(config_path: &Path, id: &str, set: Vec<(String, JsonValue)>) -> bool {
    let properties: Properties = set.into_iter().collect();
    let result = open_session(config_path).and_then(|(_, mut session)| {
        require_object(&session, id)?;
        commit_local(&mut session, ObjectDiff::update(id, properties))
    });
    if !report(result) {
        return false;
    }
    println!("✓ Updated {}", id);
    true
}

pub fn handle_remove(config_path: &Path, id: &str) -> bool {
    let result = open_session(config_path).and_then(|(_, mut session)| {
        require_object(&session, id)?;
        commit_local(&mut session, ObjectDiff::remove(id))
    });
    if !report(result) {
        return false;
    }
    println!("✓ Removed {}", id);
    true
}

pub fn handle_get(config_path: &Path, id: &str) -> bool {
    let result = open_session(config_path).and_then(|(_, session)| {
        let object = require_object(&session, id)?;
        println!("{}", serde_json::to_string_pretty(&object)?);
        Ok(())
    });
    report(result)
}

pub fn handle_list(
    config_path: &Path,
    object_type: Option<&str>,
    filters: Vec<(String, JsonValue)>,
    limit: usize,
) -> bool {
    let result = open_session(config_path).and_then(|(_, session)| {
        let mut page = session.fetch(object_type, limit.min(LIST_PAGE_SIZE), filter(filters))?;
        let mut printed = 0;
        loop {
            for (id, object) in &page.objects {
                println!(
                    "{}\t{}\t{}",
                    id,
                    object.object_type,
                    serde_json::to_string(&object.properties)?
                );
            }
            printed += page.objects.len();
            if page.cursor.no_more_results || printed >= limit {
                break;
            }
            page = session.fetch_more(&page.cursor, (limit - printed).min(LIST_PAGE_SIZE))?;
        }
        if !page.cursor.no_more_results {
            eprintln!("(more objects not shown, raise --limit)");
        }
        Ok(())
    });
    report(result)
}

pub fn handle_count(
    config_path: &Path,
    object_type: Option<&str>,
    filters: Vec<(String, JsonValue)>,
) -> bool {
    let result = open_session(config_path).and_then(|(_, session)| {
        println!("{}", session.count(object_type, filter(filters))?);
        Ok(())
    });
    report(result)
}

/// Write `diff` to the local journal, merge it and save the snapshots.
fn commit_local(session: &mut ReplicaSession, diff: ObjectDiff) -> Result<()> {
    session.append(vec![diff], DiffOrigin::Local)?;
    session.drain()?;
    session.save()
}

fn require_object(session: &ReplicaSession, id: &str) -> Result<DatabaseObject> {
    session
        .object(id)?
        .ok_or_else(|| TandemError::ObjectNotFound(id.to_string()))
}

/// Predicate matching objects whose properties equal every filter.
fn filter(filters: Vec<(String, JsonValue)>) -> Option<Predicate> {
    if filters.is_empty() {
        return None;
    }
    let predicate: Predicate = Arc::new(move |object: &DatabaseObject| {
        filters
            .iter()
            .all(|(key, value)| object.get(key) == Some(value))
    });
    Some(predicate)
}
