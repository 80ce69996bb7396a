//! Database connection pool management.

use crate::config::{DatabaseType, StorageConfig};
use crate::error::{Result, StorageError};
use serde::Serialize;
use sqlx::{any::AnyPoolOptions, AnyPool};
use std::sync::Arc;
use tracing::{debug, info};

/// Database connection pool.
#[derive(Clone)]
pub struct DatabasePool {
    pool: AnyPool,
    database_type: DatabaseType,
    config: Arc<StorageConfig>,
}

impl DatabasePool {
    /// Connect a new database pool.
    ///
    /// An in-memory SQLite database lives only as long as its connection, so
    /// such pools are pinned to a single connection that never expires.
    pub async fn connect(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        let database_type = config.database_type()?;

        sqlx::any::install_default_drivers();

        let in_memory =
            database_type == DatabaseType::SQLite && config.database_url.contains(":memory:");

        let pool_options = if in_memory {
            AnyPoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            AnyPoolOptions::new()
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
        };

        let pool = pool_options
            .acquire_timeout(config.connect_timeout)
            .connect(&config.database_url)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        info!(database = %database_type, in_memory, "Database pool connected");

        Ok(Self {
            pool,
            database_type,
            config: Arc::new(config),
        })
    }

    /// Get a reference to the underlying pool.
    #[must_use]
    pub fn inner(&self) -> &AnyPool {
        &self.pool
    }

    /// Get the database type.
    #[must_use]
    pub fn database_type(&self) -> DatabaseType {
        self.database_type
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Close the pool.
    pub async fn close(&self) {
        debug!("Closing database pool");
        self.pool.close().await;
    }

    /// Get pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max_connections: self.config.max_connections,
        }
    }

    /// Test the connection.
    pub async fn test_connection(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(())
    }
}

impl std::fmt::Debug for DatabasePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabasePool")
            .field("database_type", &self.database_type)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    /// Current number of connections.
    pub size: u32,
    /// Number of idle connections.
    pub idle: usize,
    /// Maximum connections allowed.
    pub max_connections: u32,
}

impl PoolStats {
    /// Get the number of active connections.
    #[must_use]
    pub fn active(&self) -> usize {
        (self.size as usize).saturating_sub(self.idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_stats() {
        let stats = PoolStats {
            size: 5,
            idle: 3,
            max_connections: 10,
        };
        assert_eq!(stats.active(), 2);
    }

    #[tokio::test]
    async fn test_connect_sqlite_memory() {
        let pool = DatabasePool::connect(StorageConfig::new("sqlite::memory:"))
            .await
            .expect("connect");
        assert_eq!(pool.database_type(), DatabaseType::SQLite);
        pool.test_connection().await.expect("select 1");
        pool.close().await;
        assert!(pool.is_closed());
    }

    #[tokio::test]
    async fn test_connect_sqlite_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("gateway.db").display());

        let pool = DatabasePool::connect(StorageConfig::new(url).with_max_connections(2))
            .await
            .expect("connect");
        pool.test_connection().await.expect("select 1");
        assert_eq!(pool.config().max_connections, 2);
    }

    #[tokio::test]
    async fn test_connect_rejects_unknown_scheme() {
        let result = DatabasePool::connect(StorageConfig::new("mysql://localhost/db")).await;
        assert!(matches!(result, Err(StorageError::UnsupportedDatabase(_))));
    }
}
