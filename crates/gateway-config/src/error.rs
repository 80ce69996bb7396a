//! Configuration errors.

use gateway_core::GatewayError;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file content is malformed
    #[error("Failed to parse {format} config: {message}")]
    Parse {
        /// Format name
        format: &'static str,
        /// Parser message
        message: String,
    },

    /// Unknown file extension
    #[error("Unsupported config format: {0} (expected .yaml, .yml or .toml)")]
    UnsupportedFormat(String),

    /// A referenced environment variable is not set
    #[error("Environment variable {0} is not set")]
    MissingEnvVar(String),

    /// An environment override has a bad value
    #[error("Invalid value for {var}: {message}")]
    InvalidEnv {
        /// Variable name
        var: String,
        /// What was wrong
        message: String,
    },

    /// The settings are inconsistent
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

impl From<validator::ValidationErrors> for ConfigError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

impl From<ConfigError> for GatewayError {
    fn from(err: ConfigError) -> Self {
        Self::configuration(err.to_string())
    }
}
