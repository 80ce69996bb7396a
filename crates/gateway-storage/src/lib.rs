//! # Gateway Storage
//!
//! Persistence for provider configurations, request logs, users and API keys.
//!
//! This crate provides:
//! - In-memory repositories for development and tests
//! - SQL repositories for PostgreSQL and SQLite over one `sqlx::AnyPool`
//! - Idempotent schema bootstrap
//!
//! ## Example
//!
//! ```rust,no_run
//! use gateway_storage::{ensure_schema, DatabasePool, SqlProviderRepository, StorageConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = DatabasePool::connect(StorageConfig::new("sqlite://gateway.db")).await?;
//!     ensure_schema(&pool).await?;
//!
//!     let providers = SqlProviderRepository::new(pool);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod memory;
pub mod pool;
pub mod schema;
pub mod sql;

pub use config::{DatabaseType, StorageConfig};
pub use error::{Result, StorageError};
pub use memory::{
    InMemoryApiKeyRepository, InMemoryProviderRepository, InMemoryRequestLogRepository,
    InMemoryUserRepository,
};
pub use pool::{DatabasePool, PoolStats};
pub use schema::ensure_schema;
pub use sql::{
    SqlApiKeyRepository, SqlProviderRepository, SqlRequestLogRepository, SqlUserRepository,
};

/// Re-export sqlx types for convenience
pub use sqlx;
