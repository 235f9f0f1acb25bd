// Provider Registry
// Name-keyed set of configured data contexts

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::db::cache::TableCache;
use crate::db::config::ProviderConfig;
use crate::db::context::DataContext;
use crate::db::traits::DatabaseError;

/// Registry for managing data contexts by provider name
pub struct ProviderRegistry {
    contexts: RwLock<HashMap<String, Arc<dyn DataContext>>>,
}

impl ProviderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
        }
    }

    /// Builds a context per configuration, all sharing one table cache
    pub fn from_configs(configs: &[ProviderConfig], cache: Arc<TableCache>) -> Result<Self, DatabaseError> {
        let registry = Self::new();
        for config in configs {
            let context = config.build_context(cache.clone())?;
            registry.register(Arc::new(context));
        }
        Ok(registry)
    }

    /// Register a context under its name, replacing any previous one
    pub fn register(&self, context: Arc<dyn DataContext>) {
        let name = context.name().to_string();
        self.contexts.write().insert(name.clone(), context);
        debug!("[Registry] Registered provider: {}", name);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn DataContext>, DatabaseError> {
        self.contexts
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DatabaseError::ProviderNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.contexts.read().contains_key(name)
    }

    /// Registered provider names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.contexts.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<dyn DataContext>> {
        let removed = self.contexts.write().remove(name);
        if removed.is_some() {
            debug!("[Registry] Unregistered provider: {}", name);
        }
        removed
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
