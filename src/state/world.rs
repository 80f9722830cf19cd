use crate::state::record::{ChangeSink, Record, Snapshot};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// World maintains the in-memory entity space
pub struct World {
    /// Lock-free concurrent map for fast reads
    space: DashMap<String, Record>,

    /// Change sinks, fired in registration order
    listeners: RwLock<Vec<Arc<dyn ChangeSink>>>,
}

impl World {
    /// Create an empty world with no listeners
    pub fn new() -> Self {
        Self {
            space: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a change sink. Sinks cannot be removed.
    pub fn add_listener(&self, sink: Arc<dyn ChangeSink>) {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        listeners.push(sink);
        debug!(listeners = listeners.len(), "Change sink registered");
    }

    /// Get entity record; unknown ids yield an empty record
    pub fn get(&self, entity_id: &str) -> Record {
        self.space
            .get(entity_id)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    /// Replace an entity's record wholesale and notify listeners
    pub fn set(&self, entity_id: &str, record: Record) -> Record {
        let mut slot = self.space.entry(entity_id.to_string()).or_default();
        *slot.value_mut() = record;

        // Entry guard is still held: no other writer for this entity can
        // slip in between the mutation and the fan-out.
        self.notify(entity_id, slot.value());

        slot.value().clone()
    }

    /// Merge a single field into an entity (creating it if absent)
    pub fn update(&self, entity_id: &str, field: &str, value: Value) -> Record {
        let mut slot = self.space.entry(entity_id.to_string()).or_default();
        slot.value_mut().insert(field.to_string(), value);

        self.notify(entity_id, slot.value());

        slot.value().clone()
    }

    /// Drop every entity. Listeners are not fired.
    pub fn clear(&self) {
        self.space.clear();
        info!("World cleared");
    }

    /// Get all entities
    pub fn snapshot(&self) -> Snapshot {
        self.space
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Clear the world, then `set` each entry of `entities` in order.
    ///
    /// Every entry is broadcast like an ordinary `set`.
    pub fn replace_all(&self, entities: impl IntoIterator<Item = (String, Record)>) -> Snapshot {
        self.clear();

        for (id, record) in entities {
            self.set(&id, record);
        }

        info!(entities = self.space.len(), "World replaced");
        self.snapshot()
    }

    /// Number of entities
    pub fn len(&self) -> usize {
        self.space.len()
    }

    pub fn is_empty(&self) -> bool {
        self.space.is_empty()
    }

    fn notify(&self, entity_id: &str, record: &Record) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for sink in listeners.iter() {
            sink.entity_changed(entity_id, record);
        }
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}
