//! Persisted provider configuration.
//!
//! The persistence layer owns these records; the rest of the gateway treats
//! each read as an immutable snapshot.

use crate::error::GatewayError;
use crate::provider::AdapterType;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::time::Duration;

/// Timeout applied when a provider is configured without one
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(300);

/// Configuration of one upstream provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Storage identifier, assigned on create
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Unique provider name, stable across reloads
    pub name: String,

    /// Adapter type tag selecting the factory
    #[serde(rename = "type")]
    pub adapter_type: AdapterType,

    /// Upstream base URL
    pub base_url: String,

    /// Request timeout
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// API key, never serialized in clear text
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_redacted"
    )]
    pub api_key: Option<SecretString>,

    /// Adapter-specific settings
    #[serde(default)]
    pub extra_config: HashMap<String, serde_json::Value>,

    /// Whether the provider should be live
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Creation time
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// Last update time
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_timeout() -> Duration {
    DEFAULT_PROVIDER_TIMEOUT
}

const fn default_enabled() -> bool {
    true
}

#[allow(clippy::ref_option)]
fn serialize_redacted<S: Serializer>(
    value: &Option<SecretString>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(_) => serializer.serialize_str("********"),
        None => serializer.serialize_none(),
    }
}

impl ProviderConfig {
    /// Create a new enabled provider configuration
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        adapter_type: impl Into<AdapterType>,
        base_url: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            name: name.into(),
            adapter_type: adapter_type.into(),
            base_url: base_url.into(),
            timeout: DEFAULT_PROVIDER_TIMEOUT,
            api_key: None,
            extra_config: HashMap::new(),
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the API key
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::new(api_key.into()));
        self
    }

    /// Set the request timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the enabled flag
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Add an adapter-specific setting
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra_config.insert(key.into(), value);
        self
    }

    /// Timeout to apply, falling back to the default when unset
    #[must_use]
    pub fn effective_timeout(&self) -> Duration {
        if self.timeout.is_zero() {
            DEFAULT_PROVIDER_TIMEOUT
        } else {
            self.timeout
        }
    }

    /// Exposed API key, if any
    #[must_use]
    pub fn api_key_str(&self) -> Option<&str> {
        self.api_key.as_ref().map(|k| k.expose_secret().as_str())
    }

    /// Check the fields required before the record can be persisted
    ///
    /// # Errors
    /// Returns a validation error naming the offending field
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.name.trim().is_empty() {
            return Err(GatewayError::validation("name cannot be empty", Some("name")));
        }
        if self.name.contains('/') {
            return Err(GatewayError::validation(
                "name cannot contain '/'",
                Some("name"),
            ));
        }
        if self.adapter_type.as_str().is_empty() {
            return Err(GatewayError::validation("type cannot be empty", Some("type")));
        }
        Ok(())
    }
}

/// Partial update of a persisted provider
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderUpdate {
    /// New adapter type
    #[serde(default, rename = "type")]
    pub adapter_type: Option<AdapterType>,

    /// New base URL
    #[serde(default)]
    pub base_url: Option<String>,

    /// New timeout
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// New API key
    #[serde(default)]
    pub api_key: Option<SecretString>,

    /// Replacement adapter-specific settings
    #[serde(default)]
    pub extra_config: Option<HashMap<String, serde_json::Value>>,

    /// New enabled flag
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl ProviderUpdate {
    /// Whether the update changes nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapter_type.is_none()
            && self.base_url.is_none()
            && self.timeout.is_none()
            && self.api_key.is_none()
            && self.extra_config.is_none()
            && self.enabled.is_none()
    }

    /// Apply the update to a config snapshot, bumping `updated_at`
    pub fn apply_to(self, config: &mut ProviderConfig) {
        if let Some(adapter_type) = self.adapter_type {
            config.adapter_type = adapter_type;
        }
        if let Some(base_url) = self.base_url {
            config.base_url = base_url;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        if let Some(api_key) = self.api_key {
            config.api_key = Some(api_key);
        }
        if let Some(extra_config) = self.extra_config {
            config.extra_config = extra_config;
        }
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        config.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_on_deserialize() {
        let json = r#"{"name": "local", "type": "vllm", "base_url": "http://localhost:8000/v1"}"#;
        let config: ProviderConfig = serde_json::from_str(json).expect("parse");
        assert!(config.enabled);
        assert_eq!(config.timeout, DEFAULT_PROVIDER_TIMEOUT);
        assert!(config.api_key.is_none());
        assert_eq!(config.adapter_type.as_str(), "vllm");
    }

    #[test]
    fn test_api_key_redacted() {
        let config = ProviderConfig::new("p1", "openai", "https://api.openai.com/v1")
            .with_api_key("sk-secret");
        let json = serde_json::to_string(&config).expect("serialize");
        assert!(!json.contains("sk-secret"));
        assert!(json.contains("********"));
        assert_eq!(config.api_key_str(), Some("sk-secret"));
    }

    #[test]
    fn test_timeout_humantime() {
        let json = r#"{"name": "p", "type": "ollama", "base_url": "http://x", "timeout": "45s"}"#;
        let config: ProviderConfig = serde_json::from_str(json).expect("parse");
        assert_eq!(config.timeout, Duration::from_secs(45));
    }

    #[test]
    fn test_zero_timeout_falls_back() {
        let config =
            ProviderConfig::new("p", "openai", "http://x").with_timeout(Duration::ZERO);
        assert_eq!(config.effective_timeout(), DEFAULT_PROVIDER_TIMEOUT);
    }

    #[test]
    fn test_validate_name() {
        assert!(ProviderConfig::new("", "openai", "http://x").validate().is_err());
        assert!(ProviderConfig::new("a/b", "openai", "http://x").validate().is_err());
        assert!(ProviderConfig::new("ok", "openai", "http://x").validate().is_ok());
    }

    #[test]
    fn test_update_apply() {
        let mut config = ProviderConfig::new("p", "openai", "http://old");
        let before = config.updated_at;
        let update = ProviderUpdate {
            base_url: Some("http://new".to_string()),
            enabled: Some(false),
            ..ProviderUpdate::default()
        };
        assert!(!update.is_empty());
        update.apply_to(&mut config);
        assert_eq!(config.base_url, "http://new");
        assert!(!config.enabled);
        assert!(config.updated_at >= before);
    }
}
