//! Process-wide producer registry.
//!
//! Maps producer identifiers to producer instances. Producers register
//! themselves when their owning subsystem starts them; the binding layer
//! only ever looks them up. The registry is shared between threads behind an
//! `Arc` and guards its map with a reader/writer lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::producer::Producer;

/// Thread-safe map from producer id to producer.
#[derive(Default)]
pub struct ProducerRegistry {
    producers: RwLock<HashMap<String, Arc<dyn Producer>>>,
}

impl ProducerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a producer under its id.
    ///
    /// Returns the producer previously registered under the same id, if any.
    pub fn register(&self, producer: Arc<dyn Producer>) -> Option<Arc<dyn Producer>> {
        let id = producer.id().to_string();
        let previous = self.producers.write().insert(id.clone(), producer);
        if previous.is_some() {
            tracing::warn!(producer = %id, "producer re-registered, replacing previous instance");
        } else {
            tracing::debug!(producer = %id, "producer registered");
        }
        previous
    }

    /// Removes a producer by id.
    pub fn unregister(&self, producer_id: &str) -> Option<Arc<dyn Producer>> {
        self.producers.write().remove(producer_id)
    }

    /// Looks a producer up by id.
    pub fn lookup(&self, producer_id: &str) -> Option<Arc<dyn Producer>> {
        self.producers.read().get(producer_id).cloned()
    }

    /// Snapshot of all registered producers, ordered by id.
    pub fn list(&self) -> Vec<Arc<dyn Producer>> {
        let mut producers: Vec<_> = self.producers.read().values().cloned().collect();
        producers.sort_by(|a, b| a.id().cmp(b.id()));
        producers
    }

    /// Number of registered producers.
    pub fn len(&self) -> usize {
        self.producers.read().len()
    }

    /// Returns `true` if no producer is registered.
    pub fn is_empty(&self) -> bool {
        self.producers.read().is_empty()
    }
}

impl std::fmt::Debug for ProducerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<String> = self.producers.read().keys().cloned().collect();
        ids.sort();
        f.debug_struct("ProducerRegistry")
            .field("producers", &ids)
            .finish()
    }
}
