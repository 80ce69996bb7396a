//! Shared application state.

use gateway_chat::ChatRelay;
use gateway_config::GatewayConfig;
use gateway_core::{GatewayError, GatewayResult};
use gateway_providers::ProviderManager;
use gateway_telemetry::{AsyncLogWriter, Metrics, MetricsConfig};
use std::sync::Arc;
use std::time::Instant;

use crate::accounts::AccountService;
use crate::auth::{AccountKeyResolver, SharedResolver, StaticKeyResolver};

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration
    pub config: Arc<GatewayConfig>,
    /// Provider lifecycle orchestration
    pub manager: Arc<ProviderManager>,
    /// Chat relay over the live store
    pub relay: ChatRelay,
    /// Prometheus metrics
    pub metrics: Metrics,
    /// Bearer token resolution
    pub resolver: SharedResolver,
    /// Request log pipeline
    pub log_writer: Arc<AsyncLogWriter>,
    /// User and key management, when account storage is wired
    pub accounts: Option<AccountService>,
    /// Process start, for uptime
    pub started_at: Instant,
}

impl AppState {
    /// Start building state
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::default()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("manager", &self.manager)
            .field("live_providers", &self.manager.store().len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`AppState`]
#[derive(Default)]
pub struct AppStateBuilder {
    config: Option<GatewayConfig>,
    manager: Option<Arc<ProviderManager>>,
    log_writer: Option<Arc<AsyncLogWriter>>,
    metrics: Option<Metrics>,
    resolver: Option<SharedResolver>,
    accounts: Option<AccountService>,
    stream_buffer: Option<usize>,
}

impl AppStateBuilder {
    /// Set the configuration (defaults otherwise)
    #[must_use]
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the provider manager
    #[must_use]
    pub fn manager(mut self, manager: Arc<ProviderManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Set the log writer
    #[must_use]
    pub fn log_writer(mut self, log_writer: Arc<AsyncLogWriter>) -> Self {
        self.log_writer = Some(log_writer);
        self
    }

    /// Set metrics (a fresh registry otherwise)
    #[must_use]
    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Set the caller resolver (built from `auth` settings otherwise)
    #[must_use]
    pub fn resolver(mut self, resolver: SharedResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Set the account service backing the user API and issued keys
    #[must_use]
    pub fn accounts(mut self, accounts: AccountService) -> Self {
        self.accounts = Some(accounts);
        self
    }

    /// Override the per-stream event buffer
    #[must_use]
    pub fn stream_buffer(mut self, buffer: usize) -> Self {
        self.stream_buffer = Some(buffer);
        self
    }

    /// Build the state
    ///
    /// # Errors
    /// Returns `Configuration` when the manager or log writer is missing or
    /// managed keys are on without accounts, or `Internal` when the metrics
    /// registry cannot be created
    pub fn build(self) -> GatewayResult<AppState> {
        let config = self.config.unwrap_or_default();
        let manager = self
            .manager
            .ok_or_else(|| GatewayError::configuration("AppState requires a provider manager"))?;
        let log_writer = self
            .log_writer
            .ok_or_else(|| GatewayError::configuration("AppState requires a log writer"))?;
        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Metrics::new(&MetricsConfig::default())
                .map_err(|e| GatewayError::internal(format!("metrics registry: {e}")))?,
        };
        let resolver: SharedResolver = match (self.resolver, &self.accounts) {
            (Some(resolver), _) => resolver,
            (None, Some(accounts)) if config.auth.managed_keys => Arc::new(AccountKeyResolver::new(
                StaticKeyResolver::from_settings(&config.auth),
                accounts.clone(),
            )),
            (None, None) if config.auth.managed_keys => {
                return Err(GatewayError::configuration(
                    "auth.managed_keys requires account storage",
                ))
            }
            (None, _) => Arc::new(StaticKeyResolver::from_settings(&config.auth)),
        };

        let mut relay = ChatRelay::new(Arc::clone(manager.store()), Arc::clone(&log_writer))
            .with_metrics(metrics.clone());
        if let Some(buffer) = self.stream_buffer {
            relay = relay.with_buffer(buffer);
        }

        Ok(AppState {
            config: Arc::new(config),
            manager,
            relay,
            metrics,
            resolver,
            log_writer,
            accounts: self.accounts,
            started_at: Instant::now(),
        })
    }
}
