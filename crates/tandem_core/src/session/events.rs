//! Change notifications.
//!
//! Subscribers registered on an [`EventRegistry`] receive a [`ChangeEvent`]
//! whenever a merge changes the object set and as a sync round progresses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::SyncFailure;
use crate::history::MergeResult;
use crate::sync::SyncProgress;

/// A unique identifier for a subscription.
pub type SubscriptionId = u64;

/// Callback function type for change events.
///
/// Callbacks run on the session's thread and should not block.
pub type EventCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// What happened to the object set or to a sync round.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// A merge changed objects.
    Merged(MergeResult),
    /// A sync round advanced.
    SyncProgress(SyncProgress),
    /// A sync round finished.
    SyncCompleted {
        /// Diffs read from journals during the round
        diffs_read: usize,
        /// Remote journals downloaded during the round
        journals_updated: Vec<String>,
    },
    /// A sync round was aborted.
    SyncFailed {
        /// The remote stage that failed, if the failure was remote
        failure: Option<SyncFailure>,
        /// Error description
        message: String,
    },
}

/// Thread-safe registry for managing event subscriptions.
///
/// ```ignore
/// let id = registry.subscribe(Arc::new(|event| {
///     println!("Event: {:?}", event);
/// }));
/// registry.unsubscribe(id);
/// ```
pub struct EventRegistry {
    callbacks: RwLock<HashMap<SubscriptionId, EventCallback>>,
    next_id: AtomicU64,
}

impl EventRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            callbacks: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to change events.
    ///
    /// Returns a subscription ID that can be used to unsubscribe later.
    pub fn subscribe(&self, callback: EventCallback) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, callback);
        id
    }

    /// Returns `true` if the subscription was found and removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// Emit an event to all registered callbacks.
    ///
    /// A panicking callback does not affect the others.
    pub fn emit(&self, event: &ChangeEvent) {
        let callbacks = self.callbacks.read().unwrap_or_else(PoisonError::into_inner);
        for callback in callbacks.values() {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(event);
            }));
        }
    }

    /// Get the number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistry")
            .field("subscriber_count", &self.subscriber_count())
            .field("next_id", &self.next_id.load(Ordering::SeqCst))
            .finish()
    }
}
