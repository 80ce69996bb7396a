//! Adapter factory registry.
//!
//! Maps a provider type tag to the constructor that turns a
//! [`ProviderConfig`] into a live adapter. The table is assembled once at
//! startup and handed to the lifecycle manager; there is no global state.

use gateway_core::{AdapterHandle, AdapterType, GatewayError, GatewayResult, ProviderConfig};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Builds adapters of one type from a config snapshot
pub trait AdapterFactory: Send + Sync {
    /// Build a new adapter bound to `config`
    ///
    /// # Errors
    /// Returns `AdapterInit` if the config cannot produce a working adapter
    fn create(&self, config: &ProviderConfig) -> GatewayResult<AdapterHandle>;
}

impl<F> AdapterFactory for F
where
    F: Fn(&ProviderConfig) -> GatewayResult<AdapterHandle> + Send + Sync,
{
    fn create(&self, config: &ProviderConfig) -> GatewayResult<AdapterHandle> {
        self(config)
    }
}

/// Table of adapter factories keyed by type tag
#[derive(Clone, Default)]
pub struct AdapterFactoryRegistry {
    factories: HashMap<AdapterType, Arc<dyn AdapterFactory>>,
}

impl AdapterFactoryRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory; a later registration for the same tag wins
    pub fn register(&mut self, adapter_type: impl Into<AdapterType>, factory: Arc<dyn AdapterFactory>) {
        let adapter_type = adapter_type.into();
        debug!(adapter_type = %adapter_type, "Registering adapter factory");
        self.factories.insert(adapter_type, factory);
    }

    /// Builder-style registration
    #[must_use]
    pub fn with_factory(
        mut self,
        adapter_type: impl Into<AdapterType>,
        factory: Arc<dyn AdapterFactory>,
    ) -> Self {
        self.register(adapter_type, factory);
        self
    }

    /// Build an adapter for `config` using the factory registered for its type
    ///
    /// # Errors
    /// Returns `UnknownType` if no factory is registered for `config.adapter_type`,
    /// or the factory's own construction error. An adapter reporting a different
    /// type than requested is rejected as `AdapterInit`.
    pub fn create(&self, config: &ProviderConfig) -> GatewayResult<AdapterHandle> {
        let factory = self
            .factories
            .get(&config.adapter_type)
            .ok_or_else(|| GatewayError::unknown_type(config.adapter_type.as_str()))?;

        let adapter = factory.create(config)?;

        if adapter.adapter_type() != &config.adapter_type {
            return Err(GatewayError::adapter_init(
                &config.name,
                format!(
                    "factory for {} produced an adapter of type {}",
                    config.adapter_type,
                    adapter.adapter_type()
                ),
            ));
        }

        Ok(adapter)
    }

    /// Whether a factory is registered for the tag
    #[must_use]
    pub fn contains(&self, adapter_type: &AdapterType) -> bool {
        self.factories.contains_key(adapter_type)
    }

    /// Registered type tags, sorted
    #[must_use]
    pub fn types(&self) -> Vec<AdapterType> {
        let mut types: Vec<_> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Number of registered factories
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for AdapterFactoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterFactoryRegistry")
            .field("types", &self.types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedFactory;

    #[test]
    fn test_unknown_type() {
        let registry = AdapterFactoryRegistry::new();
        let config = ProviderConfig::new("p1", "smtp", "http://x");
        let err = registry.create(&config).expect_err("no factory");
        assert!(matches!(err, GatewayError::UnknownType { .. }));
    }

    #[test]
    fn test_created_type_matches_config() {
        let registry = AdapterFactoryRegistry::new()
            .with_factory("vllm", Arc::new(ScriptedFactory::new("vllm")))
            .with_factory("ollama", Arc::new(ScriptedFactory::new("ollama")));

        for tag in ["vllm", "ollama"] {
            let config = ProviderConfig::new(format!("p-{tag}"), tag, "http://x");
            let adapter = registry.create(&config).expect("create");
            assert_eq!(adapter.adapter_type().as_str(), tag);
            assert_eq!(adapter.name(), format!("p-{tag}"));
        }
    }

    #[test]
    fn test_mismatched_type_rejected() {
        // A factory registered under the wrong tag builds adapters of its own type.
        let registry = AdapterFactoryRegistry::new()
            .with_factory("openai", Arc::new(ScriptedFactory::new("vllm")));
        let config = ProviderConfig::new("p1", "openai", "http://x");
        let err = registry.create(&config).expect_err("mismatch");
        assert!(matches!(err, GatewayError::AdapterInit { .. }));
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = AdapterFactoryRegistry::new();
        registry.register("vllm", Arc::new(ScriptedFactory::new("vllm").failing()));
        registry.register("vllm", Arc::new(ScriptedFactory::new("vllm")));
        assert_eq!(registry.len(), 1);

        let config = ProviderConfig::new("p1", "vllm", "http://x");
        assert!(registry.create(&config).is_ok());
    }

    #[test]
    fn test_closure_factory() {
        let registry = AdapterFactoryRegistry::new().with_factory(
            "custom",
            Arc::new(|config: &ProviderConfig| -> GatewayResult<AdapterHandle> {
                Err(GatewayError::adapter_init(&config.name, "not today"))
            }),
        );
        let config = ProviderConfig::new("p1", "custom", "http://x");
        let err = registry.create(&config).expect_err("closure error");
        assert!(err.to_string().contains("not today"));
        assert_eq!(registry.types(), vec![AdapterType::new("custom")]);
    }
}
