//! Error types for the gateway.
//!
//! Every failure in the gateway is a value of [`GatewayError`]. Lifecycle
//! errors are local and recoverable; chat errors are surfaced to the caller
//! and logged independently.

use thiserror::Error;

/// Result alias used across the gateway crates
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Gateway error taxonomy
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// No adapter factory is registered for the provider type
    #[error("unknown provider type: {adapter_type}")]
    UnknownType {
        /// The unresolved type tag
        adapter_type: String,
    },

    /// A record with the same unique name is already persisted
    #[error("{resource} name already exists: {name}")]
    DuplicateName {
        /// Kind of record ("provider", "user", ...)
        resource: &'static str,
        /// The conflicting name
        name: String,
    },

    /// The adapter factory failed to build an instance
    #[error("failed to initialize adapter for provider {provider}: {message}")]
    AdapterInit {
        /// Provider name
        provider: String,
        /// Construction failure reason
        message: String,
    },

    /// The requested resource is not resolvable
    #[error("{resource} not found: {name}")]
    NotFound {
        /// Kind of resource ("provider", "request log", ...)
        resource: &'static str,
        /// Name or identifier that was looked up
        name: String,
    },

    /// Enable/disable requested on a provider already in that state
    #[error("provider {name} is already {state}")]
    AlreadyInState {
        /// Provider name
        name: String,
        /// "enabled" or "disabled"
        state: &'static str,
    },

    /// The upstream adapter call failed
    #[error("upstream error from provider {provider}: {message}")]
    Upstream {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
        /// HTTP status reported by the upstream, if any
        status_code: Option<u16>,
    },

    /// The persistence layer failed
    #[error("persistence error: {message}")]
    Persistence {
        /// Error message
        message: String,
    },

    /// Invalid configuration
    #[error("configuration error: {message}")]
    Configuration {
        /// Error message
        message: String,
    },

    /// Invalid request input
    #[error("validation error: {message}")]
    Validation {
        /// Error message
        message: String,
        /// Offending field
        field: Option<String>,
    },

    /// Unexpected internal failure
    #[error("internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl GatewayError {
    /// Create an unknown provider type error
    pub fn unknown_type(adapter_type: impl Into<String>) -> Self {
        Self::UnknownType {
            adapter_type: adapter_type.into(),
        }
    }

    /// Create a duplicate provider name error
    pub fn duplicate_name(name: impl Into<String>) -> Self {
        Self::duplicate("provider", name)
    }

    /// Create a duplicate name error for any record kind
    pub fn duplicate(resource: &'static str, name: impl Into<String>) -> Self {
        Self::DuplicateName {
            resource,
            name: name.into(),
        }
    }

    /// Create an adapter initialization error
    pub fn adapter_init(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AdapterInit {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a provider not found error
    pub fn provider_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            resource: "provider",
            name: name.into(),
        }
    }

    /// Create a generic not found error
    pub fn not_found(resource: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            name: name.into(),
        }
    }

    /// Create an already-in-state error
    pub fn already_in_state(name: impl Into<String>, enabled: bool) -> Self {
        Self::AlreadyInState {
            name: name.into(),
            state: if enabled { "enabled" } else { "disabled" },
        }
    }

    /// Create an upstream error
    pub fn upstream(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upstream {
            provider: provider.into(),
            message: message.into(),
            status_code: None,
        }
    }

    /// Create an upstream error carrying the upstream HTTP status
    pub fn upstream_status(
        provider: impl Into<String>,
        message: impl Into<String>,
        status_code: u16,
    ) -> Self {
        Self::Upstream {
            provider: provider.into(),
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    /// Create a persistence error
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Validation {
            message: message.into(),
            field: field.map(ToString::to_string),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status code for this error
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::DuplicateName { .. } | Self::AlreadyInState { .. } => 409,
            Self::Validation { .. } => 400,
            Self::UnknownType { .. } | Self::AdapterInit { .. } => 422,
            Self::Upstream { .. } => 502,
            Self::Persistence { .. } | Self::Configuration { .. } | Self::Internal { .. } => 500,
        }
    }

    /// Stable machine-readable error code
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::UnknownType { .. } => "unknown_provider_type",
            Self::DuplicateName { .. } => "duplicate_name",
            Self::AdapterInit { .. } => "adapter_init_error",
            Self::NotFound { .. } => "not_found",
            Self::AlreadyInState { .. } => "already_in_state",
            Self::Upstream { .. } => "upstream_error",
            Self::Persistence { .. } => "persistence_error",
            Self::Configuration { .. } => "configuration_error",
            Self::Validation { .. } => "invalid_request_error",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Whether retrying the same operation later may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream { status_code, .. } => {
                matches!(status_code, None | Some(429 | 500..=599))
            }
            Self::AdapterInit { .. } | Self::Persistence { .. } => true,
            _ => false,
        }
    }

    /// Whether this error means the name did not resolve
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("serialization failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(GatewayError::provider_not_found("p1").status_code(), 404);
        assert_eq!(GatewayError::duplicate_name("p1").status_code(), 409);
        assert_eq!(GatewayError::already_in_state("p1", true).status_code(), 409);
        assert_eq!(GatewayError::upstream("p1", "boom").status_code(), 502);
        assert_eq!(GatewayError::unknown_type("smtp").status_code(), 422);
        assert_eq!(GatewayError::validation("bad", None).status_code(), 400);
    }

    #[test]
    fn test_display() {
        let err = GatewayError::already_in_state("p1", false);
        assert_eq!(err.to_string(), "provider p1 is already disabled");

        let err = GatewayError::unknown_type("smtp");
        assert_eq!(err.to_string(), "unknown provider type: smtp");

        let err = GatewayError::duplicate("user", "alice");
        assert_eq!(err.to_string(), "user name already exists: alice");
    }

    #[test]
    fn test_retryable() {
        assert!(GatewayError::upstream("p", "reset").is_retryable());
        assert!(GatewayError::upstream_status("p", "busy", 503).is_retryable());
        assert!(!GatewayError::upstream_status("p", "bad key", 401).is_retryable());
        assert!(!GatewayError::duplicate_name("p").is_retryable());
    }
}
