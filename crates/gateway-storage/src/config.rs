//! Storage configuration.

use crate::error::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Database type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// PostgreSQL database.
    #[default]
    PostgreSQL,
    /// SQLite database.
    SQLite,
}

impl DatabaseType {
    /// Parse from a database URL.
    #[must_use]
    pub fn from_url(url: &str) -> Option<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if url.starts_with("sqlite://") || url.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PostgreSQL => write!(f, "postgresql"),
            Self::SQLite => write!(f, "sqlite"),
        }
    }
}

/// Connection settings for the SQL backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database connection URL.
    pub database_url: String,

    /// Maximum connection pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum idle connections.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection acquire timeout.
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

impl StorageConfig {
    /// Create a configuration for the given URL with default pool settings.
    #[must_use]
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout: default_connect_timeout(),
        }
    }

    /// Set maximum connections.
    #[must_use]
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set minimum connections.
    #[must_use]
    pub fn with_min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Set connection timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Database type detected from the URL.
    pub fn database_type(&self) -> Result<DatabaseType> {
        DatabaseType::from_url(&self.database_url)
            .ok_or_else(|| StorageError::UnsupportedDatabase(self.database_url.clone()))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.database_url.is_empty() {
            return Err(StorageError::config("Database URL is required"));
        }

        if self.max_connections == 0 {
            return Err(StorageError::config(
                "Max connections must be greater than 0",
            ));
        }

        if self.min_connections > self.max_connections {
            return Err(StorageError::config(
                "Min connections cannot exceed max connections",
            ));
        }

        self.database_type()?;
        Ok(())
    }
}
