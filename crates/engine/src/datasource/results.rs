//! Latest value per data source plus a feed of every update.

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::scope::DATA_SOURCE_PREFIX;

const UPDATE_CAPACITY: usize = 256;

/// One write to the results map.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultUpdate {
    pub id: String,
    pub value: Value,
}

/// Data source results keyed by descriptor id.
#[derive(Debug)]
pub struct DataSourceResults {
    values: RwLock<IndexMap<String, Value>>,
    updates: broadcast::Sender<ResultUpdate>,
}

impl Default for DataSourceResults {
    fn default() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            values: RwLock::new(IndexMap::new()),
            updates,
        }
    }
}

impl DataSourceResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Value> {
        self.values.read().get(id).cloned()
    }

    pub fn snapshot(&self) -> IndexMap<String, Value> {
        self.values.read().clone()
    }

    /// Stores `value` and publishes it to subscribers.
    pub fn insert(&self, id: &str, value: Value) {
        self.values.write().insert(id.to_string(), value.clone());
        // No receivers is fine; the map still holds the value.
        let _ = self.updates.send(ResultUpdate { id: id.to_string(), value });
    }

    pub fn remove(&self, id: &str) -> Option<Value> {
        self.values.write().shift_remove(id)
    }

    pub fn clear(&self) {
        self.values.write().clear();
    }

    /// Receives every subsequent [`ResultUpdate`].
    pub fn subscribe(&self) -> broadcast::Receiver<ResultUpdate> {
        self.updates.subscribe()
    }

    /// Results keyed as `ds_<id>` for the resolution scope.
    pub fn scope_entries(&self) -> Map<String, Value> {
        self.values
            .read()
            .iter()
            .map(|(id, value)| (format!("{DATA_SOURCE_PREFIX}{id}"), value.clone()))
            .collect()
    }
}
