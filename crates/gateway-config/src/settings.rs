//! Settings tree.
//!
//! Every section has defaults, so an empty file (or no file) yields a
//! runnable in-memory gateway on `0.0.0.0:8080` with auth disabled.

use gateway_core::{AdapterType, ProviderConfig, DEFAULT_PROVIDER_TIMEOUT};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use validator::Validate;

use crate::error::{ConfigError, ConfigResult};

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP listener
    #[validate(nested)]
    pub server: ServerSettings,

    /// Persistence backend
    #[validate(nested)]
    pub database: DatabaseSettings,

    /// Request log pipeline
    #[validate(nested)]
    pub log_writer: LogWriterSettings,

    /// Log output
    pub logging: LoggingSettings,

    /// API keys
    #[validate(nested)]
    pub auth: AuthSettings,

    /// Providers seeded into the store at startup
    #[validate(nested)]
    pub providers: Vec<ProviderSeed>,
}

impl GatewayConfig {
    /// Run field-level and cross-field validation
    ///
    /// # Errors
    /// Returns `Validation` describing the first problem found
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.validate()?;

        if !matches!(
            self.logging.format.to_ascii_lowercase().as_str(),
            "pretty" | "text" | "json"
        ) {
            return Err(ConfigError::Validation(format!(
                "logging.format must be pretty or json, got {}",
                self.logging.format
            )));
        }

        if self.server.request_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "server.request_timeout must be greater than zero".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for seed in &self.providers {
            if seed.name.contains('/') {
                return Err(ConfigError::Validation(format!(
                    "provider name {} must not contain '/'",
                    seed.name
                )));
            }
            if !names.insert(seed.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate provider name: {}",
                    seed.name
                )));
            }
            if seed.timeout.is_some_and(|t| t.is_zero()) {
                return Err(ConfigError::Validation(format!(
                    "provider {}: timeout must be greater than zero",
                    seed.name
                )));
            }
        }

        let mut keys = HashSet::new();
        for entry in &self.auth.keys {
            if entry.key.expose_secret().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "auth key for caller {} is empty",
                    entry.caller
                )));
            }
            if !keys.insert(entry.key.expose_secret().as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate auth key (caller {})",
                    entry.caller
                )));
            }
        }

        if self.auth.managed_keys && !self.auth.keys.iter().any(|entry| entry.admin) {
            return Err(ConfigError::Validation(
                "auth.managed_keys requires at least one admin key to issue user keys".to_string(),
            ));
        }

        Ok(())
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address
    #[validate(length(min = 1, message = "host cannot be empty"))]
    pub host: String,

    /// Bind port
    #[validate(range(min = 1))]
    pub port: u16,

    /// Timeout for non-streaming requests
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Grace period for in-flight requests at shutdown
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Permissive CORS
    pub cors_enabled: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(120),
            shutdown_timeout: Duration::from_secs(30),
            cors_enabled: true,
        }
    }
}

/// Persistence settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Connection URL; empty selects the in-memory repositories
    pub url: String,

    /// Maximum pool size
    #[validate(range(min = 1))]
    pub max_connections: u32,

    /// Minimum idle connections
    pub min_connections: u32,

    /// Connect timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl DatabaseSettings {
    /// Whether a SQL backend is configured
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

/// Request log pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LogWriterSettings {
    /// Bounded queue size; records beyond it are dropped
    #[validate(range(min = 1))]
    pub queue_capacity: usize,
}

impl Default for LogWriterSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// API key settings; no keys and no managed keys disables authentication
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AuthSettings {
    /// Accepted keys
    #[validate(nested)]
    pub keys: Vec<ApiKeyEntry>,

    /// Also accept keys issued to users through the admin API
    pub managed_keys: bool,
}

impl AuthSettings {
    /// Whether requests must carry a key
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.managed_keys || !self.keys.is_empty()
    }
}

/// One accepted API key
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ApiKeyEntry {
    /// Bearer token; may reference `${VAR}`
    #[serde(skip_serializing)]
    pub key: SecretString,

    /// Caller identity recorded for requests using this key
    #[validate(length(min = 1, message = "caller cannot be empty"))]
    pub caller: String,

    /// Whether the key may use admin routes
    #[serde(default)]
    pub admin: bool,
}

/// Provider inserted at startup when no record with its name exists
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProviderSeed {
    /// Unique provider name
    #[validate(length(min = 1, message = "provider name cannot be empty"))]
    pub name: String,

    /// Adapter type tag
    #[serde(rename = "type")]
    pub adapter_type: AdapterType,

    /// Upstream base URL
    #[validate(length(min = 1, message = "base_url cannot be empty"))]
    pub base_url: String,

    /// Request timeout
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// Upstream credential; may reference `${VAR}`
    #[serde(default, skip_serializing)]
    pub api_key: Option<SecretString>,

    /// Adapter-specific settings
    #[serde(default)]
    pub extra_config: HashMap<String, serde_json::Value>,

    /// Desired state
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl ProviderSeed {
    /// Convert into a provider record
    #[must_use]
    pub fn to_provider_config(&self) -> ProviderConfig {
        let mut config = ProviderConfig::new(&self.name, self.adapter_type.clone(), &self.base_url)
            .with_timeout(self.timeout.unwrap_or(DEFAULT_PROVIDER_TIMEOUT))
            .with_enabled(self.enabled);
        config.api_key = self.api_key.clone();
        config.extra_config = self.extra_config.clone();
        config
    }
}
