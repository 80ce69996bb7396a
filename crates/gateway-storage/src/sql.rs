//! SQL repositories over the `Any` driver.
//!
//! The same statements run against PostgreSQL and SQLite; `$n` placeholders
//! are understood by both.

use crate::error::{is_unique_violation, StorageError};
use crate::pool::DatabasePool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gateway_core::{
    AdapterType, ApiKey, ApiKeyRepository, ApiKeyStatus, CallerId, GatewayResult, ProviderConfig,
    ProviderRepository, RequestLog, RequestLogRepository, RequestStatus, User, UserRepository,
};
use secrecy::SecretString;
use sqlx::any::AnyRow;
use sqlx::Row;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};

const PROVIDER_COLUMNS: &str = "id, name, provider_type, base_url, timeout_ms, api_key, \
     extra_config, enabled, created_at, updated_at";

const REQUEST_LOG_COLUMNS: &str = "id, caller, model_name, request_messages, response_content, \
     prompt_tokens, completion_tokens, total_tokens, latency_ms, status, error_message, created_at";

const USER_COLUMNS: &str = "id, name, email, created_at, updated_at";

const API_KEY_COLUMNS: &str =
    "id, user_id, token, status, last_used_at, expires_at, created_at, updated_at";

fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StorageError::decode(format!("{column}: {e}")))
}

fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, StorageError> {
    value.map(|v| parse_timestamp(column, &v)).transpose()
}

fn duration_to_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn non_negative(column: &str, value: i64) -> Result<u64, StorageError> {
    u64::try_from(value).map_err(|_| StorageError::decode(format!("{column}: negative value")))
}

fn token_count(column: &str, value: i64) -> Result<u32, StorageError> {
    u32::try_from(value).map_err(|_| StorageError::decode(format!("{column}: out of range")))
}

/// Provider repository backed by the `providers` table
#[derive(Debug, Clone)]
pub struct SqlProviderRepository {
    pool: DatabasePool,
}

impl SqlProviderRepository {
    /// Create a repository over a connected pool
    #[must_use]
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    fn row_to_config(row: &AnyRow) -> Result<ProviderConfig, StorageError> {
        let api_key: Option<String> = row.try_get("api_key")?;
        let extra_config: String = row.try_get("extra_config")?;
        let extra_config: HashMap<String, serde_json::Value> = serde_json::from_str(&extra_config)?;
        let timeout_ms: i64 = row.try_get("timeout_ms")?;
        let enabled: i64 = row.try_get("enabled")?;
        let provider_type: String = row.try_get("provider_type")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(ProviderConfig {
            id: Some(row.try_get("id")?),
            name: row.try_get("name")?,
            adapter_type: AdapterType::new(provider_type),
            base_url: row.try_get("base_url")?,
            timeout: Duration::from_millis(non_negative("timeout_ms", timeout_ms)?),
            api_key: api_key.map(SecretString::new),
            extra_config,
            enabled: enabled != 0,
            created_at: parse_timestamp("created_at", &created_at)?,
            updated_at: parse_timestamp("updated_at", &updated_at)?,
        })
    }

    fn not_found(name: &str) -> StorageError {
        StorageError::NotFound {
            entity: "provider",
            key: name.to_string(),
        }
    }
}

#[async_trait]
impl ProviderRepository for SqlProviderRepository {
    #[instrument(skip(self, config), fields(provider = %config.name))]
    async fn create(&self, mut config: ProviderConfig) -> GatewayResult<ProviderConfig> {
        let now = Utc::now();
        config.created_at = now;
        config.updated_at = now;

        let sql = "INSERT INTO providers (name, provider_type, base_url, timeout_ms, api_key, \
                   extra_config, enabled, created_at, updated_at) \
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING id";

        let row = sqlx::query(sql)
            .bind(&config.name)
            .bind(config.adapter_type.as_str())
            .bind(&config.base_url)
            .bind(duration_to_millis(config.timeout))
            .bind(config.api_key_str().map(ToString::to_string))
            .bind(serde_json::to_string(&config.extra_config).map_err(StorageError::from)?)
            .bind(i64::from(config.enabled))
            .bind(now.to_rfc3339())
            .bind(now.to_rfc3339())
            .fetch_one(self.pool.inner())
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StorageError::Duplicate {
                        entity: "provider",
                        key: config.name.clone(),
                    }
                } else {
                    StorageError::from(e)
                }
            })?;

        config.id = Some(row.try_get("id").map_err(StorageError::from)?);
        debug!(id = ?config.id, "Provider persisted");
        Ok(config)
    }

    async fn get_by_name(&self, name: &str) -> GatewayResult<ProviderConfig> {
        let sql = format!("SELECT {PROVIDER_COLUMNS} FROM providers WHERE name = $1");
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(self.pool.inner())
            .await
            .map_err(StorageError::from)?
            .ok_or_else(|| Self::not_found(name))?;

        Ok(Self::row_to_config(&row)?)
    }

    async fn list(&self) -> GatewayResult<Vec<ProviderConfig>> {
        let sql = format!("SELECT {PROVIDER_COLUMNS} FROM providers ORDER BY name");
        let rows = sqlx::query(&sql)
            .fetch_all(self.pool.inner())
            .await
            .map_err(StorageError::from)?;

        let configs = rows
            .iter()
            .map(Self::row_to_config)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(configs)
    }

    #[instrument(skip(self, config), fields(provider = %config.name))]
    async fn update(&self, mut config: ProviderConfig) -> GatewayResult<ProviderConfig> {
        let now = Utc::now();
        let sql = "UPDATE providers SET provider_type = $1, base_url = $2, timeout_ms = $3, \
                   api_key = $4, extra_config = $5, enabled = $6, updated_at = $7 \
                   WHERE name = $8";

        let result = sqlx::query(sql)
            .bind(config.adapter_type.as_str())
            .bind(&config.base_url)
            .bind(duration_to_millis(config.timeout))
            .bind(config.api_key_str().map(ToString::to_string))
            .bind(serde_json::to_string(&config.extra_config).map_err(StorageError::from)?)
            .bind(i64::from(config.enabled))
            .bind(now.to_rfc3339())
            .bind(&config.name)
            .execute(self.pool.inner())
            .await
            .map_err(StorageError::from)?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(&config.name).into());
        }

        config.updated_at = now;
        let stored = self.get_by_name(&config.name).await?;
        config.id = stored.id;
        config.created_at = stored.created_at;
        Ok(config)
    }

    async fn delete(&self, name: &str) -> GatewayResult<()> {
        let result = sqlx::query("DELETE FROM providers WHERE name = $1")
            .bind(name)
            .execute(self.pool.inner())
            .await
            .map_err(StorageError::from)?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(name).into());
        }
        Ok(())
    }

    async fn exists_by_name(&self, name: &str) -> GatewayResult<bool> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM providers WHERE name = $1")
            .bind(name)
            .fetch_one(self.pool.inner())
            .await
            .map_err(StorageError::from)?;

        let count: i64 = row.try_get("n").map_err(StorageError::from)?;
        Ok(count > 0)
    }
}

/// Request log repository backed by the `request_logs` table
#[derive(Debug, Clone)]
pub struct SqlRequestLogRepository {
    pool: DatabasePool,
}

impl SqlRequestLogRepository {
    /// Create a repository over a connected pool
    #[must_use]
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    fn row_to_log(row: &AnyRow) -> Result<RequestLog, StorageError> {
        let status: String = row.try_get("status")?;
        let status = RequestStatus::parse(&status)
            .ok_or_else(|| StorageError::decode(format!("status: unknown value {status}")))?;
        let caller: String = row.try_get("caller")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(RequestLog {
            id: Some(row.try_get("id")?),
            caller: CallerId::new(caller),
            model_name: row.try_get("model_name")?,
            request_messages: row.try_get("request_messages")?,
            response_content: row.try_get("response_content")?,
            prompt_tokens: token_count("prompt_tokens", row.try_get("prompt_tokens")?)?,
            completion_tokens: token_count("completion_tokens", row.try_get("completion_tokens")?)?,
            total_tokens: token_count("total_tokens", row.try_get("total_tokens")?)?,
            latency_ms: non_negative("latency_ms", row.try_get("latency_ms")?)?,
            status,
            error_message: row.try_get("error_message")?,
            created_at: parse_timestamp("created_at", &created_at)?,
        })
    }
}

#[async_trait]
impl RequestLogRepository for SqlRequestLogRepository {
    async fn create(&self, mut log: RequestLog) -> GatewayResult<RequestLog> {
        let sql = "INSERT INTO request_logs (caller, model_name, request_messages, \
                   response_content, prompt_tokens, completion_tokens, total_tokens, latency_ms, \
                   status, error_message, created_at) \
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING id";

        let row = sqlx::query(sql)
            .bind(log.caller.as_str())
            .bind(&log.model_name)
            .bind(&log.request_messages)
            .bind(&log.response_content)
            .bind(i64::from(log.prompt_tokens))
            .bind(i64::from(log.completion_tokens))
            .bind(i64::from(log.total_tokens))
            .bind(i64::try_from(log.latency_ms).unwrap_or(i64::MAX))
            .bind(log.status.as_str())
            .bind(log.error_message.clone())
            .bind(log.created_at.to_rfc3339())
            .fetch_one(self.pool.inner())
            .await
            .map_err(StorageError::from)?;

        log.id = Some(row.try_get("id").map_err(StorageError::from)?);
        Ok(log)
    }

    async fn list_recent(&self, limit: usize) -> GatewayResult<Vec<RequestLog>> {
        let sql = format!("SELECT {REQUEST_LOG_COLUMNS} FROM request_logs ORDER BY id DESC LIMIT $1");
        let rows = sqlx::query(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(self.pool.inner())
            .await
            .map_err(StorageError::from)?;

        let logs = rows
            .iter()
            .map(Self::row_to_log)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(logs)
    }
}

/// User repository backed by the `users` table
#[derive(Debug, Clone)]
pub struct SqlUserRepository {
    pool: DatabasePool,
}

impl SqlUserRepository {
    /// Create a repository over a connected pool
    #[must_use]
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    fn row_to_user(row: &AnyRow) -> Result<User, StorageError> {
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(User {
            id: Some(row.try_get("id")?),
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            created_at: parse_timestamp("created_at", &created_at)?,
            updated_at: parse_timestamp("updated_at", &updated_at)?,
        })
    }
}

#[async_trait]
impl UserRepository for SqlUserRepository {
    #[instrument(skip(self, user), fields(user = %user.name))]
    async fn create(&self, mut user: User) -> GatewayResult<User> {
        let now = Utc::now();
        user.created_at = now;
        user.updated_at = now;

        let sql = "INSERT INTO users (name, email, created_at, updated_at) \
                   VALUES ($1, $2, $3, $4) RETURNING id";

        let row = sqlx::query(sql)
            .bind(&user.name)
            .bind(user.email.clone())
            .bind(now.to_rfc3339())
            .bind(now.to_rfc3339())
            .fetch_one(self.pool.inner())
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StorageError::Duplicate {
                        entity: "user",
                        key: user.name.clone(),
                    }
                } else {
                    StorageError::from(e)
                }
            })?;

        user.id = Some(row.try_get("id").map_err(StorageError::from)?);
        debug!(id = ?user.id, "User persisted");
        Ok(user)
    }

    async fn get(&self, id: i64) -> GatewayResult<User> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.pool.inner())
            .await
            .map_err(StorageError::from)?
            .ok_or_else(|| StorageError::NotFound {
                entity: "user",
                key: id.to_string(),
            })?;

        Ok(Self::row_to_user(&row)?)
    }

    async fn list(&self) -> GatewayResult<Vec<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id");
        let rows = sqlx::query(&sql)
            .fetch_all(self.pool.inner())
            .await
            .map_err(StorageError::from)?;

        let users = rows
            .iter()
            .map(Self::row_to_user)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }
}

/// API key repository backed by the `api_keys` table
#[derive(Debug, Clone)]
pub struct SqlApiKeyRepository {
    pool: DatabasePool,
}

impl SqlApiKeyRepository {
    /// Create a repository over a connected pool
    #[must_use]
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    fn row_to_key(row: &AnyRow) -> Result<ApiKey, StorageError> {
        let status: String = row.try_get("status")?;
        let status = ApiKeyStatus::parse(&status)
            .ok_or_else(|| StorageError::decode(format!("status: unknown value {status}")))?;
        let token: String = row.try_get("token")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(ApiKey {
            id: Some(row.try_get("id")?),
            user_id: row.try_get("user_id")?,
            key: SecretString::new(token),
            status,
            last_used_at: parse_optional_timestamp("last_used_at", row.try_get("last_used_at")?)?,
            expires_at: parse_optional_timestamp("expires_at", row.try_get("expires_at")?)?,
            created_at: parse_timestamp("created_at", &created_at)?,
            updated_at: parse_timestamp("updated_at", &updated_at)?,
        })
    }

    fn not_found(id: i64) -> StorageError {
        StorageError::NotFound {
            entity: "api key",
            key: id.to_string(),
        }
    }

    async fn get_owned(&self, user_id: i64, id: i64) -> Result<ApiKey, StorageError> {
        let sql = format!("SELECT {API_KEY_COLUMNS} FROM api_keys WHERE id = $1 AND user_id = $2");
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(self.pool.inner())
            .await?
            .ok_or_else(|| Self::not_found(id))?;

        Self::row_to_key(&row)
    }
}

#[async_trait]
impl ApiKeyRepository for SqlApiKeyRepository {
    #[instrument(skip(self, key), fields(user_id = key.user_id))]
    async fn create(&self, mut key: ApiKey) -> GatewayResult<ApiKey> {
        let now = Utc::now();
        key.created_at = now;
        key.updated_at = now;

        let sql = "INSERT INTO api_keys (user_id, token, status, last_used_at, expires_at, \
                   created_at, updated_at) \
                   VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id";

        let row = sqlx::query(sql)
            .bind(key.user_id)
            .bind(key.key_str().to_string())
            .bind(key.status.as_str())
            .bind(key.last_used_at.map(|ts| ts.to_rfc3339()))
            .bind(key.expires_at.map(|ts| ts.to_rfc3339()))
            .bind(now.to_rfc3339())
            .bind(now.to_rfc3339())
            .fetch_one(self.pool.inner())
            .await
            .map_err(StorageError::from)?;

        key.id = Some(row.try_get("id").map_err(StorageError::from)?);
        debug!(id = ?key.id, "API key persisted");
        Ok(key)
    }

    async fn find_by_key(&self, key: &str) -> GatewayResult<Option<ApiKey>> {
        let sql = format!("SELECT {API_KEY_COLUMNS} FROM api_keys WHERE token = $1");
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(self.pool.inner())
            .await
            .map_err(StorageError::from)?;

        Ok(row.as_ref().map(Self::row_to_key).transpose()?)
    }

    async fn list_by_user(&self, user_id: i64) -> GatewayResult<Vec<ApiKey>> {
        let sql = format!("SELECT {API_KEY_COLUMNS} FROM api_keys WHERE user_id = $1 ORDER BY id");
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(self.pool.inner())
            .await
            .map_err(StorageError::from)?;

        let keys = rows
            .iter()
            .map(Self::row_to_key)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    async fn set_status(
        &self,
        user_id: i64,
        id: i64,
        status: ApiKeyStatus,
    ) -> GatewayResult<ApiKey> {
        let result = sqlx::query(
            "UPDATE api_keys SET status = $1, updated_at = $2 WHERE id = $3 AND user_id = $4",
        )
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .bind(user_id)
        .execute(self.pool.inner())
        .await
        .map_err(StorageError::from)?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(id).into());
        }
        Ok(self.get_owned(user_id, id).await?)
    }

    async fn delete(&self, user_id: i64, id: i64) -> GatewayResult<()> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(self.pool.inner())
            .await
            .map_err(StorageError::from)?;

        if result.rows_affected() == 0 {
            return Err(Self::not_found(id).into());
        }
        Ok(())
    }

    async fn touch(&self, id: i64, at: DateTime<Utc>) -> GatewayResult<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = $1 WHERE id = $2")
            .bind(at.to_rfc3339())
            .bind(id)
            .execute(self.pool.inner())
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }
}
