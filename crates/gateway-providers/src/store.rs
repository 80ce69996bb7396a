//! Provider instance store.
//!
//! The live, name-keyed table of adapters serving traffic. Every read hands
//! out an owned [`AdapterHandle`], and every write swaps a whole slot, so a
//! replacement never disturbs calls already running on the previous adapter.

use dashmap::DashMap;
use gateway_core::{AdapterHandle, GatewayError, GatewayResult};
use std::fmt;

/// Concurrent table of live adapters
#[derive(Default)]
pub struct InstanceStore {
    instances: DashMap<String, AdapterHandle>,
}

impl InstanceStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or overwrite the adapter for `name`, returning the previous one
    pub fn put(&self, name: impl Into<String>, adapter: AdapterHandle) -> Option<AdapterHandle> {
        self.instances.insert(name.into(), adapter)
    }

    /// Make `name` unresolvable, returning the adapter that was live
    pub fn remove(&self, name: &str) -> Option<AdapterHandle> {
        self.instances.remove(name).map(|(_, adapter)| adapter)
    }

    /// Resolve a live adapter
    ///
    /// # Errors
    /// Returns `NotFound` if nothing is live under `name`
    pub fn get(&self, name: &str) -> GatewayResult<AdapterHandle> {
        self.instances
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| GatewayError::provider_not_found(name))
    }

    /// Whether an adapter is live under `name`
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.instances.contains_key(name)
    }

    /// Best-effort snapshot of live adapters, sorted by name
    #[must_use]
    pub fn list(&self) -> Vec<AdapterHandle> {
        let mut adapters: Vec<AdapterHandle> = self
            .instances
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        adapters.sort_by(|a, b| a.name().cmp(b.name()));
        adapters
    }

    /// Number of live adapters
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether nothing is live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl fmt::Debug for InstanceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceStore")
            .field("live", &self.len())
            .finish()
    }
}
