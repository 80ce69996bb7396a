//! Database schema bootstrap.
//!
//! Tables are created idempotently at startup. Timestamps are stored as
//! RFC 3339 text and booleans as integers so both dialects decode through
//! the `Any` driver identically.

use crate::config::DatabaseType;
use crate::error::{Result, StorageError};
use crate::pool::DatabasePool;
use tracing::{debug, info};

const POSTGRES_SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS providers (
        id BIGSERIAL PRIMARY KEY,
        name VARCHAR(255) NOT NULL UNIQUE,
        provider_type VARCHAR(64) NOT NULL,
        base_url TEXT NOT NULL,
        timeout_ms BIGINT NOT NULL,
        api_key TEXT,
        extra_config TEXT NOT NULL DEFAULT '{}',
        enabled BIGINT NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS request_logs (
        id BIGSERIAL PRIMARY KEY,
        caller VARCHAR(255) NOT NULL,
        model_name VARCHAR(255) NOT NULL,
        request_messages TEXT NOT NULL,
        response_content TEXT NOT NULL,
        prompt_tokens BIGINT NOT NULL DEFAULT 0,
        completion_tokens BIGINT NOT NULL DEFAULT 0,
        total_tokens BIGINT NOT NULL DEFAULT 0,
        latency_ms BIGINT NOT NULL DEFAULT 0,
        status VARCHAR(20) NOT NULL,
        error_message TEXT,
        created_at TEXT NOT NULL
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_request_logs_model_name ON request_logs(model_name)",
    "CREATE INDEX IF NOT EXISTS idx_request_logs_created_at ON request_logs(created_at)",
    r"
    CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        name VARCHAR(255) NOT NULL UNIQUE,
        email VARCHAR(255),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS api_keys (
        id BIGSERIAL PRIMARY KEY,
        user_id BIGINT NOT NULL,
        token VARCHAR(255) NOT NULL UNIQUE,
        status VARCHAR(20) NOT NULL DEFAULT 'active',
        last_used_at TEXT,
        expires_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_api_keys_user_id ON api_keys(user_id)",
];

const SQLITE_SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS providers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        provider_type TEXT NOT NULL,
        base_url TEXT NOT NULL,
        timeout_ms INTEGER NOT NULL,
        api_key TEXT,
        extra_config TEXT NOT NULL DEFAULT '{}',
        enabled INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS request_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        caller TEXT NOT NULL,
        model_name TEXT NOT NULL,
        request_messages TEXT NOT NULL,
        response_content TEXT NOT NULL,
        prompt_tokens INTEGER NOT NULL DEFAULT 0,
        completion_tokens INTEGER NOT NULL DEFAULT 0,
        total_tokens INTEGER NOT NULL DEFAULT 0,
        latency_ms INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        error_message TEXT,
        created_at TEXT NOT NULL
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_request_logs_model_name ON request_logs(model_name)",
    "CREATE INDEX IF NOT EXISTS idx_request_logs_created_at ON request_logs(created_at)",
    r"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        email TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS api_keys (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        token TEXT NOT NULL UNIQUE,
        status TEXT NOT NULL DEFAULT 'active',
        last_used_at TEXT,
        expires_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_api_keys_user_id ON api_keys(user_id)",
];

/// DDL statements for a dialect, in execution order.
#[must_use]
pub fn statements(database_type: DatabaseType) -> &'static [&'static str] {
    match database_type {
        DatabaseType::PostgreSQL => POSTGRES_SCHEMA,
        DatabaseType::SQLite => SQLITE_SCHEMA,
    }
}

/// Create the gateway tables if they do not exist.
pub async fn ensure_schema(pool: &DatabasePool) -> Result<()> {
    let database_type = pool.database_type();
    info!(database = %database_type, "Ensuring database schema");

    for statement in statements(database_type) {
        sqlx::query(statement)
            .execute(pool.inner())
            .await
            .map_err(|e| StorageError::Execution(e.to_string()))?;
    }

    debug!("Database schema ready");
    Ok(())
}
