//! Provider lifecycle manager.
//!
//! Persisted configs are the source of truth. Every mutating operation
//! persists first and then converges the live slot in the [`InstanceStore`]
//! with the stored desired state. Adapter construction failures leave a
//! provider configured but not live; they never leave a half-built adapter
//! in the store.
//!
//! Lifecycle operations on the same name are serialized so a slow rebuild
//! cannot reinstall an adapter after a concurrent disable. Request-side
//! lookups never take these locks.

use crate::factory::AdapterFactoryRegistry;
use crate::store::InstanceStore;
use dashmap::DashMap;
use gateway_core::{
    AdapterHandle, AdapterType, GatewayError, GatewayResult, ProviderConfig, ProviderRepository,
    ProviderUpdate,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, instrument, warn};

/// Per-name outcome of a bulk reload
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ReloadReport {
    /// Providers that converged
    pub succeeded: Vec<String>,
    /// Providers that failed, with the error text
    pub failed: Vec<(String, String)>,
}

impl ReloadReport {
    /// Whether every provider converged
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Names of the failed providers
    #[must_use]
    pub fn failed_names(&self) -> Vec<&str> {
        self.failed.iter().map(|(name, _)| name.as_str()).collect()
    }
}

/// Desired versus actual state of one provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    /// Persisted config; the API key is redacted when serialized
    #[serde(flatten)]
    pub config: ProviderConfig,
    /// Whether an adapter is live under this name
    pub live: bool,
    /// Type of the live adapter, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_type: Option<AdapterType>,
}

/// Holds the lifecycle lock of one name.
///
/// The map entry is removed on release once no other operation holds or
/// awaits it, so only names with operations in flight keep an entry.
struct NameGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for NameGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.name, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Orchestrates create, enable/disable and reload against the instance store
pub struct ProviderManager {
    repository: Arc<dyn ProviderRepository>,
    factories: Arc<AdapterFactoryRegistry>,
    store: Arc<InstanceStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ProviderManager {
    /// Create a new manager
    pub fn new(
        repository: Arc<dyn ProviderRepository>,
        factories: AdapterFactoryRegistry,
        store: Arc<InstanceStore>,
    ) -> Self {
        Self {
            repository,
            factories: Arc::new(factories),
            store,
            locks: DashMap::new(),
        }
    }

    /// The live instance store
    #[must_use]
    pub fn store(&self) -> &Arc<InstanceStore> {
        &self.store
    }

    /// The factory table
    #[must_use]
    pub fn factories(&self) -> &AdapterFactoryRegistry {
        &self.factories
    }

    /// The persistence backend
    #[must_use]
    pub fn repository(&self) -> &Arc<dyn ProviderRepository> {
        &self.repository
    }

    async fn lock(&self, name: &str) -> NameGuard<'_> {
        let lock = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        NameGuard {
            locks: &self.locks,
            name: name.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    fn build_and_install(&self, config: &ProviderConfig) -> GatewayResult<()> {
        let adapter = self.factories.create(config)?;
        let replaced = self.store.put(config.name.clone(), adapter).is_some();
        info!(
            provider = %config.name,
            adapter_type = %config.adapter_type,
            replaced,
            "Provider adapter installed"
        );
        Ok(())
    }

    /// Persist a new provider and, if enabled, bring it live
    ///
    /// The record stays persisted even when the adapter cannot be built; a
    /// later reload can bring it live.
    ///
    /// # Errors
    /// `DuplicateName` if the name exists, `Validation` for a malformed
    /// config, `UnknownType`/`AdapterInit` if the adapter cannot be built
    #[instrument(skip(self, config), fields(provider = %config.name))]
    pub async fn create_provider(&self, config: ProviderConfig) -> GatewayResult<ProviderConfig> {
        config.validate()?;
        let _guard = self.lock(&config.name).await;

        if self.repository.exists_by_name(&config.name).await? {
            return Err(GatewayError::duplicate_name(&config.name));
        }

        let created = self.repository.create(config).await?;
        info!(enabled = created.enabled, "Provider created");

        if created.enabled {
            if let Err(e) = self.build_and_install(&created) {
                warn!(error = %e, "Provider persisted but adapter construction failed");
                return Err(e);
            }
        }

        Ok(created)
    }

    /// Converge the live slot of one provider with its persisted config
    ///
    /// # Errors
    /// `NotFound` if the provider is not persisted, or the construction error;
    /// on construction failure the previous adapter stays live
    #[instrument(skip(self))]
    pub async fn reload(&self, name: &str) -> GatewayResult<()> {
        let _guard = self.lock(name).await;
        self.reload_locked(name).await
    }

    async fn reload_locked(&self, name: &str) -> GatewayResult<()> {
        let config = self.repository.get_by_name(name).await?;

        if !config.enabled {
            if self.store.remove(name).is_some() {
                info!(provider = %name, "Provider disabled, adapter removed");
            }
            return Ok(());
        }

        self.build_and_install(&config).map_err(|e| {
            error!(provider = %name, error = %e, "Provider reload failed, keeping previous adapter");
            e
        })
    }

    /// Reload every persisted provider independently
    ///
    /// # Errors
    /// Only if the provider list cannot be read; per-provider failures are
    /// reported in the [`ReloadReport`]
    #[instrument(skip(self))]
    pub async fn reload_all(&self) -> GatewayResult<ReloadReport> {
        let configs = self.repository.list().await?;
        let mut report = ReloadReport::default();

        for config in configs {
            match self.reload(&config.name).await {
                Ok(()) => report.succeeded.push(config.name),
                Err(e) => report.failed.push((config.name, e.to_string())),
            }
        }

        if report.is_success() {
            info!(count = report.succeeded.len(), "All providers reloaded");
        } else {
            warn!(
                succeeded = report.succeeded.len(),
                failed = ?report.failed_names(),
                "Some providers failed to reload"
            );
        }
        Ok(report)
    }

    /// Build and install every enabled persisted provider at startup
    ///
    /// A failing provider is logged and skipped; startup continues.
    ///
    /// # Errors
    /// Only if the provider list cannot be read
    #[instrument(skip(self))]
    pub async fn init_providers(&self) -> GatewayResult<ReloadReport> {
        let configs = self.repository.list().await?;
        let mut report = ReloadReport::default();

        for config in configs.into_iter().filter(|c| c.enabled) {
            let _guard = self.lock(&config.name).await;
            match self.build_and_install(&config) {
                Ok(()) => report.succeeded.push(config.name),
                Err(e) => {
                    error!(provider = %config.name, error = %e, "Failed to initialize provider");
                    report.failed.push((config.name, e.to_string()));
                }
            }
        }

        info!(
            live = report.succeeded.len(),
            failed = report.failed.len(),
            "Providers initialized"
        );
        Ok(report)
    }

    /// Mark a provider enabled and bring it live
    ///
    /// # Errors
    /// `AlreadyInState` if already enabled, `NotFound` if not persisted, or the
    /// construction error (the flag stays persisted)
    #[instrument(skip(self))]
    pub async fn enable(&self, name: &str) -> GatewayResult<()> {
        self.set_enabled(name, true).await
    }

    /// Mark a provider disabled and take it out of service
    ///
    /// # Errors
    /// `AlreadyInState` if already disabled, `NotFound` if not persisted
    #[instrument(skip(self))]
    pub async fn disable(&self, name: &str) -> GatewayResult<()> {
        self.set_enabled(name, false).await
    }

    async fn set_enabled(&self, name: &str, enabled: bool) -> GatewayResult<()> {
        let _guard = self.lock(name).await;

        let mut config = self.repository.get_by_name(name).await?;
        if config.enabled == enabled {
            return Err(GatewayError::already_in_state(name, enabled));
        }

        config.enabled = enabled;
        self.repository.update(config).await?;
        info!(provider = %name, enabled, "Provider state persisted");

        self.reload_locked(name).await
    }

    /// Patch a persisted provider and converge its live slot
    ///
    /// # Errors
    /// `NotFound`, `Validation`, or the construction error after the patch
    /// has been persisted
    #[instrument(skip(self, update))]
    pub async fn update_provider(
        &self,
        name: &str,
        update: ProviderUpdate,
    ) -> GatewayResult<ProviderConfig> {
        let _guard = self.lock(name).await;

        let mut config = self.repository.get_by_name(name).await?;
        if update.is_empty() {
            return Ok(config);
        }

        update.apply_to(&mut config);
        config.validate()?;
        let updated = self.repository.update(config).await?;
        info!(provider = %name, "Provider updated");

        self.reload_locked(name).await?;
        Ok(updated)
    }

    /// Delete a persisted provider and take it out of service
    ///
    /// # Errors
    /// `NotFound` if not persisted
    #[instrument(skip(self))]
    pub async fn delete_provider(&self, name: &str) -> GatewayResult<()> {
        let _guard = self.lock(name).await;

        self.repository.delete(name).await?;
        self.store.remove(name);
        info!(provider = %name, "Provider deleted");
        Ok(())
    }

    /// Persisted config of one provider
    ///
    /// # Errors
    /// `NotFound` if not persisted
    pub async fn get_config(&self, name: &str) -> GatewayResult<ProviderConfig> {
        self.repository.get_by_name(name).await
    }

    /// Resolve a live adapter
    ///
    /// # Errors
    /// `NotFound` if the provider is absent, disabled, or failed to build
    pub fn get_provider(&self, name: &str) -> GatewayResult<AdapterHandle> {
        self.store.get(name)
    }

    /// Persisted configs joined with their liveness
    ///
    /// # Errors
    /// Only if the provider list cannot be read
    pub async fn list_with_status(&self) -> GatewayResult<Vec<ProviderStatus>> {
        let configs = self.repository.list().await?;

        Ok(configs
            .into_iter()
            .map(|config| {
                let live = self.store.get(&config.name).ok();
                ProviderStatus {
                    live: live.is_some(),
                    live_type: live.map(|adapter| adapter.adapter_type().clone()),
                    config,
                }
            })
            .collect())
    }

    /// Insert a config only if no provider with that name is persisted
    ///
    /// Returns whether the seed was inserted.
    ///
    /// # Errors
    /// `Validation` or a persistence failure
    pub async fn seed_provider(&self, config: ProviderConfig) -> GatewayResult<bool> {
        config.validate()?;
        let _guard = self.lock(&config.name).await;

        if self.repository.exists_by_name(&config.name).await? {
            return Ok(false);
        }
        self.repository.create(config).await?;
        Ok(true)
    }
}

impl fmt::Debug for ProviderManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderManager")
            .field("factories", &self.factories)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedFactory;
    use async_trait::async_trait;
    use gateway_core::{ChatMessage, ChatRequest};
    use gateway_storage::InMemoryProviderRepository;

    fn factories() -> AdapterFactoryRegistry {
        AdapterFactoryRegistry::new()
            .with_factory("vllm", Arc::new(ScriptedFactory::new("vllm")))
            .with_factory("ollama", Arc::new(ScriptedFactory::new("ollama")))
    }

    fn manager() -> ProviderManager {
        ProviderManager::new(
            Arc::new(InMemoryProviderRepository::new()),
            factories(),
            Arc::new(InstanceStore::new()),
        )
    }

    async fn label_of(adapter: &AdapterHandle) -> String {
        let request = ChatRequest::builder()
            .message(ChatMessage::user("ping"))
            .build()
            .expect("request");
        adapter.chat(request).await.expect("chat").model
    }

    #[tokio::test]
    async fn test_create_enabled_goes_live() {
        let manager = manager();
        manager
            .create_provider(ProviderConfig::new("p1", "vllm", "http://a"))
            .await
            .expect("create");

        let adapter = manager.get_provider("p1").expect("live");
        assert_eq!(adapter.adapter_type().as_str(), "vllm");
    }

    #[tokio::test]
    async fn test_create_disabled_is_not_live() {
        let manager = manager();
        manager
            .create_provider(ProviderConfig::new("p1", "vllm", "http://a").with_enabled(false))
            .await
            .expect("create");
        assert!(manager.get_provider("p1").expect_err("not live").is_not_found());
    }

    #[tokio::test]
    async fn test_create_duplicate_changes_nothing() {
        let manager = manager();
        manager
            .create_provider(ProviderConfig::new("p1", "vllm", "http://a"))
            .await
            .expect("create");

        let err = manager
            .create_provider(ProviderConfig::new("p1", "ollama", "http://b"))
            .await
            .expect_err("duplicate");
        assert!(matches!(err, GatewayError::DuplicateName { .. }));

        let adapter = manager.get_provider("p1").expect("live");
        assert_eq!(label_of(&adapter).await, "http://a");
    }

    #[tokio::test]
    async fn test_create_build_failure_keeps_record() {
        let manager = manager();
        let err = manager
            .create_provider(
                ProviderConfig::new("p1", "vllm", "http://a")
                    .with_extra("fail", serde_json::json!(true)),
            )
            .await
            .expect_err("build fails");
        assert!(matches!(err, GatewayError::AdapterInit { .. }));

        assert!(manager.get_config("p1").await.is_ok());
        assert!(manager.get_provider("p1").is_err());
    }

    #[tokio::test]
    async fn test_create_unknown_type() {
        let manager = manager();
        let err = manager
            .create_provider(ProviderConfig::new("p1", "smtp", "http://a"))
            .await
            .expect_err("unknown type");
        assert!(matches!(err, GatewayError::UnknownType { .. }));
    }

    #[tokio::test]
    async fn test_reload_replaces_instance() {
        let manager = manager();
        manager
            .create_provider(ProviderConfig::new("p1", "vllm", "http://old"))
            .await
            .expect("create");
        let before = manager.get_provider("p1").expect("live");

        let update = ProviderUpdate {
            base_url: Some("http://new".to_string()),
            ..ProviderUpdate::default()
        };
        manager.update_provider("p1", update).await.expect("update");

        let after = manager.get_provider("p1").expect("live");
        assert_eq!(label_of(&after).await, "http://new");
        // The handle resolved before the reload still targets the old snapshot.
        assert_eq!(label_of(&before).await, "http://old");
    }

    #[tokio::test]
    async fn test_reload_failure_keeps_previous_instance() {
        let manager = manager();
        manager
            .create_provider(ProviderConfig::new("p1", "vllm", "http://old"))
            .await
            .expect("create");

        let mut config = manager.get_config("p1").await.expect("config");
        config.base_url = String::new();
        manager.repository().update(config).await.expect("persist broken config");

        let err = manager.reload("p1").await.expect_err("reload fails");
        assert!(matches!(err, GatewayError::AdapterInit { .. }));

        let adapter = manager.get_provider("p1").expect("still live");
        assert_eq!(label_of(&adapter).await, "http://old");
    }

    #[tokio::test]
    async fn test_reload_disabled_removes_and_is_idempotent() {
        let manager = manager();
        manager
            .create_provider(ProviderConfig::new("p1", "vllm", "http://a"))
            .await
            .expect("create");

        let mut config = manager.get_config("p1").await.expect("config");
        config.enabled = false;
        manager.repository().update(config).await.expect("persist");

        manager.reload("p1").await.expect("reload");
        manager.reload("p1").await.expect("reload again");
        assert!(manager.get_provider("p1").is_err());
    }

    #[tokio::test]
    async fn test_enable_disable() {
        let manager = manager();
        manager
            .create_provider(ProviderConfig::new("p1", "vllm", "http://a"))
            .await
            .expect("create");

        let err = manager.enable("p1").await.expect_err("already enabled");
        assert!(matches!(err, GatewayError::AlreadyInState { .. }));

        manager.disable("p1").await.expect("disable");
        assert!(manager.get_provider("p1").expect_err("disabled").is_not_found());
        assert!(!manager.get_config("p1").await.expect("config").enabled);

        let err = manager.disable("p1").await.expect_err("already disabled");
        assert!(matches!(err, GatewayError::AlreadyInState { .. }));

        manager.enable("p1").await.expect("enable");
        assert!(manager.get_provider("p1").is_ok());
    }

    #[tokio::test]
    async fn test_enable_missing_provider() {
        let manager = manager();
        let err = manager.enable("ghost").await.expect_err("missing");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_reload_all_isolates_failures() {
        let manager = manager();
        manager
            .create_provider(ProviderConfig::new("p1", "vllm", "http://a"))
            .await
            .expect("create");
        let _ = manager
            .create_provider(ProviderConfig::new("p2", "smtp", "http://b"))
            .await;

        let report = manager.reload_all().await.expect("report");
        assert!(!report.is_success());
        assert_eq!(report.succeeded, vec!["p1".to_string()]);
        assert_eq!(report.failed_names(), vec!["p2"]);
        assert!(manager.get_provider("p1").is_ok());
    }

    #[tokio::test]
    async fn test_init_providers_skips_disabled_and_failures() {
        let repository = Arc::new(InMemoryProviderRepository::new());
        for config in [
            ProviderConfig::new("good", "vllm", "http://a"),
            ProviderConfig::new("off", "vllm", "http://b").with_enabled(false),
            ProviderConfig::new("bad", "vllm", ""),
        ] {
            repository.create(config).await.expect("seed");
        }

        let manager = ProviderManager::new(repository, factories(), Arc::new(InstanceStore::new()));
        let report = manager.init_providers().await.expect("init");

        assert_eq!(report.succeeded, vec!["good".to_string()]);
        assert_eq!(report.failed_names(), vec!["bad"]);
        assert_eq!(manager.store().len(), 1);
    }

    #[tokio::test]
    async fn test_list_with_status() {
        let manager = manager();
        manager
            .create_provider(ProviderConfig::new("a", "vllm", "http://a"))
            .await
            .expect("create");
        manager
            .create_provider(ProviderConfig::new("b", "ollama", "http://b").with_enabled(false))
            .await
            .expect("create");

        let statuses = manager.list_with_status().await.expect("list");
        assert_eq!(statuses.len(), 2);
        assert!(statuses[0].live);
        assert_eq!(statuses[0].live_type, Some(AdapterType::new("vllm")));
        assert!(!statuses[1].live);
        assert!(statuses[1].live_type.is_none());
    }

    #[tokio::test]
    async fn test_persistence_failure_is_fatal() {
        let manager = ProviderManager::new(
            Arc::new(FlakyRepository),
            factories(),
            Arc::new(InstanceStore::new()),
        );
        let err = manager.reload_all().await.expect_err("list fails");
        assert!(matches!(err, GatewayError::Persistence { .. }));
        let err = manager
            .create_provider(ProviderConfig::new("p1", "vllm", "http://a"))
            .await
            .expect_err("exists fails");
        assert!(matches!(err, GatewayError::Persistence { .. }));
    }

    #[tokio::test]
    async fn test_delete_provider() {
        let manager = manager();
        manager
            .create_provider(ProviderConfig::new("p1", "vllm", "http://a"))
            .await
            .expect("create");
        manager.delete_provider("p1").await.expect("delete");
        assert!(manager.get_provider("p1").is_err());
        assert!(manager.get_config("p1").await.is_err());
        assert!(manager.delete_provider("p1").await.is_err());
    }

    #[tokio::test]
    async fn test_lifecycle_locks_released() {
        let manager = manager();
        manager
            .create_provider(ProviderConfig::new("p1", "vllm", "http://a"))
            .await
            .expect("create");
        manager.disable("p1").await.expect("disable");

        for name in ["ghost-1", "ghost-2", "ghost-3"] {
            assert!(manager.enable(name).await.is_err());
            assert!(manager.reload(name).await.is_err());
        }
        manager.delete_provider("p1").await.expect("delete");

        assert!(manager.locks.is_empty());
    }

    #[tokio::test]
    async fn test_seed_provider_only_when_absent() {
        let manager = manager();
        assert!(manager
            .seed_provider(ProviderConfig::new("p1", "vllm", "http://a"))
            .await
            .expect("seed"));
        assert!(!manager
            .seed_provider(ProviderConfig::new("p1", "vllm", "http://b"))
            .await
            .expect("seed"));
        assert_eq!(manager.get_config("p1").await.expect("config").base_url, "http://a");
    }

    /// Repository whose every call fails.
    struct FlakyRepository;

    #[async_trait]
    impl ProviderRepository for FlakyRepository {
        async fn create(&self, _config: ProviderConfig) -> GatewayResult<ProviderConfig> {
            Err(GatewayError::persistence("database unavailable"))
        }

        async fn get_by_name(&self, _name: &str) -> GatewayResult<ProviderConfig> {
            Err(GatewayError::persistence("database unavailable"))
        }

        async fn list(&self) -> GatewayResult<Vec<ProviderConfig>> {
            Err(GatewayError::persistence("database unavailable"))
        }

        async fn update(&self, _config: ProviderConfig) -> GatewayResult<ProviderConfig> {
            Err(GatewayError::persistence("database unavailable"))
        }

        async fn delete(&self, _name: &str) -> GatewayResult<()> {
            Err(GatewayError::persistence("database unavailable"))
        }

        async fn exists_by_name(&self, _name: &str) -> GatewayResult<bool> {
            Err(GatewayError::persistence("database unavailable"))
        }
    }
}
