//! Globals shared by every runtime of a dispatch session

use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;
use tracing::trace;

use crate::error::{EngineError, EngineResult};

type Global = Arc<dyn Any + Send + Sync>;

/// Registry of lazily constructed values keyed by stable 64-bit ids
///
/// Lives as long as the event source is active. First access for a key
/// constructs the value exactly once, even under concurrent callers.
#[derive(Default)]
pub struct EventScope {
    registry: DashMap<u64, Global>,
}

impl EventScope {
    /// Empty scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value for `key`, constructing it with `init` if absent
    pub fn get_or_init<V, F>(&self, key: u64, init: F) -> EngineResult<Arc<V>>
    where
        V: Any + Send + Sync,
        F: FnOnce() -> V,
    {
        // The entry keeps its shard locked while `init` runs
        let global = self
            .registry
            .entry(key)
            .or_insert_with(|| {
                trace!(key, "Initializing global");
                Arc::new(init()) as Global
            })
            .value()
            .clone();
        global
            .downcast::<V>()
            .map_err(|_| EngineError::GlobalTypeMismatch(key))
    }

    /// Get an existing value
    pub fn get<V>(&self, key: u64) -> EngineResult<Arc<V>>
    where
        V: Any + Send + Sync,
    {
        let global = self
            .registry
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or(EngineError::GlobalMissing(key))?;
        global
            .downcast::<V>()
            .map_err(|_| EngineError::GlobalTypeMismatch(key))
    }

    /// Whether a global is stored under `key`
    pub fn contains(&self, key: u64) -> bool {
        self.registry.contains_key(&key)
    }

    /// Drop the global under `key`; `true` if one was stored
    pub fn remove(&self, key: u64) -> bool {
        self.registry.remove(&key).is_some()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Forget every global, e.g. when the event source restarts
    pub fn clear(&self) {
        self.registry.clear();
    }
}

impl std::fmt::Debug for EventScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventScope")
            .field("globals", &self.registry.len())
            .finish()
    }
}
