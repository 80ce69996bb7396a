//! Storage error types.

use gateway_core::GatewayError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage error type.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database connection error.
    #[error("Database connection error: {0}")]
    Connection(String),

    /// SQL execution error.
    #[error("SQL execution error: {0}")]
    Execution(String),

    /// Row not found.
    #[error("{entity} not found: {key}")]
    NotFound {
        /// Entity kind.
        entity: &'static str,
        /// Lookup key.
        key: String,
    },

    /// Unique constraint violated.
    #[error("Duplicate {entity}: {key}")]
    Duplicate {
        /// Entity kind.
        entity: &'static str,
        /// Conflicting key.
        key: String,
    },

    /// Stored data could not be decoded.
    #[error("Corrupt row: {0}")]
    Decode(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Pool error.
    #[error("Connection pool error: {0}")]
    Pool(String),

    /// Timeout error.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Database not supported.
    #[error("Database type not supported: {0}")]
    UnsupportedDatabase(String),
}

impl StorageError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create an execution error.
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Create a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Check if the error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout(_) | Self::Pool(_)
        )
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(e) => Self::Config(e.to_string()),
            sqlx::Error::Database(e) => Self::Execution(e.to_string()),
            sqlx::Error::Io(e) => Self::Connection(e.to_string()),
            sqlx::Error::PoolTimedOut => Self::Timeout("Connection pool timed out".to_string()),
            sqlx::Error::PoolClosed => Self::Pool("Connection pool is closed".to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) => {
                Self::Decode(err.to_string())
            }
            _ => Self::Execution(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<StorageError> for GatewayError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { entity, key } => GatewayError::not_found(entity, key),
            StorageError::Duplicate { entity, key } => GatewayError::duplicate(entity, key),
            StorageError::Config(message) => GatewayError::configuration(message),
            other => GatewayError::persistence(other.to_string()),
        }
    }
}

/// Whether a sqlx error is a unique-constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}
