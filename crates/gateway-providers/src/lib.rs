//! # Gateway Providers
//!
//! Provider adapters and their lifecycle for the LLM Provider Gateway.
//!
//! This crate provides:
//! - An OpenAI-compatible adapter serving the `openai`, `vllm` and `ollama` types
//! - The factory registry mapping type tags to adapter constructors
//! - The instance store holding live adapters by provider name
//! - The lifecycle manager keeping persisted configs and live adapters in step

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod factory;
pub mod manager;
pub mod openai;
pub mod store;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use factory::{AdapterFactory, AdapterFactoryRegistry};
pub use manager::{ProviderManager, ProviderStatus, ReloadReport};
pub use openai::{default_factories, OpenAiCompatibleAdapter, OpenAiCompatibleFactory};
pub use store::InstanceStore;
