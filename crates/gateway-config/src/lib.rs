//! # Gateway Config
//!
//! Configuration for the LLM Provider Gateway.
//!
//! This crate provides:
//! - The [`GatewayConfig`] settings tree with defaults
//! - Loading from YAML or TOML files
//! - Environment overrides and `${VAR}` expansion for secrets
//! - Validation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod settings;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use settings::{
    ApiKeyEntry, AuthSettings, DatabaseSettings, GatewayConfig, LogWriterSettings,
    LoggingSettings, ProviderSeed, ServerSettings,
};
