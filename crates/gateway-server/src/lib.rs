//! # Gateway Server
//!
//! HTTP surface for the LLM provider gateway.
//!
//! This crate provides:
//! - Chat endpoint with buffered JSON and SSE streaming responses
//! - Provider administration API with hot reload
//! - User and API key management
//! - Bearer API key authentication
//! - Health, readiness and Prometheus metrics endpoints
//! - Graceful shutdown handling

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod accounts;
pub mod auth;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod state;

// Re-export main types
pub use accounts::AccountService;
pub use auth::{
    auth_middleware, require_admin, AccountKeyResolver, AuthError, Caller, CallerResolver,
    SharedResolver, StaticKeyResolver,
};
pub use error::ApiError;
pub use routes::create_router;
pub use server::{Server, ServerConfig};
pub use shutdown::shutdown_signal;
pub use state::{AppState, AppStateBuilder};
