//! Application state access.

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tessera_util::{get_path, remove_path, set_path};

/// Accessor/mutator pair over the application state tree.
///
/// Implementations must not hold locks across calls; the runtime never awaits
/// while mutating state.
pub trait StateStore: Send + Sync {
    /// A consistent copy of the whole tree.
    fn snapshot(&self) -> Value;
    fn get(&self, path: &str) -> Option<Value>;
    /// Writes `value` at `path`, returning the previous value.
    fn set(&self, path: &str, value: Value) -> Option<Value>;
    fn remove(&self, path: &str) -> Option<Value>;
}

/// In-memory [`StateStore`] backed by a JSON object.
#[derive(Debug)]
pub struct MemoryStateStore {
    root: RwLock<Value>,
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new(Value::Object(Map::new()))
    }
}

impl MemoryStateStore {
    /// Non-object roots are replaced with an empty object.
    pub fn new(initial: Value) -> Self {
        let root = if initial.is_object() { initial } else { Value::Object(Map::new()) };
        Self { root: RwLock::new(root) }
    }
}

impl StateStore for MemoryStateStore {
    fn snapshot(&self) -> Value {
        self.root.read().clone()
    }

    fn get(&self, path: &str) -> Option<Value> {
        get_path(&self.root.read(), path).cloned()
    }

    fn set(&self, path: &str, value: Value) -> Option<Value> {
        set_path(&mut self.root.write(), path, value)
    }

    fn remove(&self, path: &str) -> Option<Value> {
        remove_path(&mut self.root.write(), path)
    }
}
