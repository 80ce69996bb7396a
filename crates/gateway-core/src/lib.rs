//! # Gateway Core
//!
//! Core types, traits, and error handling for the provider gateway.
//!
//! This crate provides the foundational types used throughout the gateway:
//! - Chat request, response and streaming chunk types
//! - The `ProviderAdapter` trait implemented by every upstream protocol adapter
//! - Persisted records (`ProviderConfig`, `RequestLog`, `User`, `ApiKey`) and their
//!   repository traits
//! - Error types and handling

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod account;
pub mod config;
pub mod error;
pub mod provider;
pub mod repository;
pub mod request;
pub mod request_log;
pub mod response;
pub mod streaming;

// Re-export commonly used types
pub use account::{ApiKey, ApiKeyStatus, User, API_KEY_PREFIX};
pub use config::{ProviderConfig, ProviderUpdate, DEFAULT_PROVIDER_TIMEOUT};
pub use error::{GatewayError, GatewayResult};
pub use provider::{AdapterHandle, AdapterType, ChunkStream, ProviderAdapter};
pub use repository::{
    ApiKeyRepository, ProviderRepository, RequestLogRepository, UserRepository,
};
pub use request::{ChatMessage, ChatRequest, ChatRequestBuilder, MessageRole};
pub use request_log::{CallerId, RequestLog, RequestStatus, CLIENT_DISCONNECTED};
pub use response::{ChatResponse, Choice, ResponseMessage, Usage};
pub use streaming::{ChatChunk, ChunkChoice, ChunkDelta};
