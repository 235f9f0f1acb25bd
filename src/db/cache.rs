// Table Existence Cache
// Remembers which tables were found or created, with one lock per table key

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const TABLE_NAMESPACE: &str = "AdoDataContext.Table";
const INIT_NAMESPACE: &str = "AdoDataContext.Initialized";

/// Key/value cache shared by the data contexts of a process
pub trait CacheStore: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Option<Value>;

    fn set(&self, namespace: &str, key: &str, value: Value);

    fn remove(&self, namespace: &str, key: &str);
}

/// In-process cache store
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, namespace: &str, key: &str) -> Option<Value> {
        self.entries.read().get(namespace).and_then(|m| m.get(key)).cloned()
    }

    fn set(&self, namespace: &str, key: &str, value: Value) {
        self.entries
            .write()
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    fn remove(&self, namespace: &str, key: &str) {
        if let Some(m) = self.entries.write().get_mut(namespace) {
            m.remove(key);
        }
    }
}

/// Terminal states of a table probe; absence means unknown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableState {
    #[serde(rename = "Table Found")]
    Found,
    #[serde(rename = "Table Created")]
    Created,
    #[serde(rename = "Table creation failed")]
    CreationFailed,
}

pub struct TableCache {
    store: Arc<dyn CacheStore>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TableCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// `connectionString[table]`
    pub fn key(connection_string: &str, table: &str) -> String {
        format!("{}[{}]", connection_string, table)
    }

    pub fn state(&self, key: &str) -> Option<TableState> {
        self.store
            .get(TABLE_NAMESPACE, key)
            .and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn set_state(&self, key: &str, state: TableState) {
        if let Ok(value) = serde_json::to_value(state) {
            self.store.set(TABLE_NAMESPACE, key, value);
        }
    }

    /// Drops a cached state so the next access probes again
    pub fn forget(&self, key: &str) {
        self.store.remove(TABLE_NAMESPACE, key);
    }

    /// Lock serializing probes and DDL for `key`
    pub fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn is_initialized(&self, key: &str) -> bool {
        self.store.get(INIT_NAMESPACE, key).is_some()
    }

    pub fn mark_initialized(&self, key: &str) {
        self.store.set(INIT_NAMESPACE, key, Value::Bool(true));
    }
}

impl Default for TableCache {
    fn default() -> Self {
        Self::new(Arc::new(MemoryCache::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip_and_forget() {
        let cache = TableCache::default();
        let key = TableCache::key("Data Source=a.db", "Widget");
        assert_eq!(key, "Data Source=a.db[Widget]");
        assert_eq!(cache.state(&key), None);

        cache.set_state(&key, TableState::Created);
        assert_eq!(cache.state(&key), Some(TableState::Created));

        cache.forget(&key);
        assert_eq!(cache.state(&key), None);
    }

    #[test]
    fn test_state_names_in_store() {
        let store = Arc::new(MemoryCache::new());
        let cache = TableCache::new(store.clone());
        cache.set_state("k", TableState::CreationFailed);
        assert_eq!(
            store.get(TABLE_NAMESPACE, "k"),
            Some(Value::String("Table creation failed".to_string()))
        );
    }

    #[test]
    fn test_lock_shared_per_key() {
        let cache = TableCache::default();
        let a = cache.lock_for("x");
        let b = cache.lock_for("x");
        let c = cache.lock_for("y");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_initialized_flag() {
        let cache = TableCache::default();
        assert!(!cache.is_initialized("sqlite:local"));
        cache.mark_initialized("sqlite:local");
        assert!(cache.is_initialized("sqlite:local"));
    }
}
