//! In-memory repositories.
//!
//! Used when no database URL is configured, and by tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gateway_core::{
    ApiKey, ApiKeyRepository, ApiKeyStatus, GatewayError, GatewayResult, ProviderConfig,
    ProviderRepository, RequestLog, RequestLogRepository, User, UserRepository,
};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Provider repository backed by an ordered map
#[derive(Debug, Default)]
pub struct InMemoryProviderRepository {
    inner: RwLock<ProviderTable>,
}

#[derive(Debug, Default)]
struct ProviderTable {
    next_id: i64,
    rows: BTreeMap<String, ProviderConfig>,
}

impl InMemoryProviderRepository {
    /// Create an empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProviderRepository for InMemoryProviderRepository {
    async fn create(&self, mut config: ProviderConfig) -> GatewayResult<ProviderConfig> {
        let mut table = self.inner.write().await;
        if table.rows.contains_key(&config.name) {
            return Err(GatewayError::duplicate_name(&config.name));
        }

        table.next_id += 1;
        let now = Utc::now();
        config.id = Some(table.next_id);
        config.created_at = now;
        config.updated_at = now;
        table.rows.insert(config.name.clone(), config.clone());
        Ok(config)
    }

    async fn get_by_name(&self, name: &str) -> GatewayResult<ProviderConfig> {
        self.inner
            .read()
            .await
            .rows
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::provider_not_found(name))
    }

    async fn list(&self) -> GatewayResult<Vec<ProviderConfig>> {
        Ok(self.inner.read().await.rows.values().cloned().collect())
    }

    async fn update(&self, mut config: ProviderConfig) -> GatewayResult<ProviderConfig> {
        let mut table = self.inner.write().await;
        let existing = table
            .rows
            .get_mut(&config.name)
            .ok_or_else(|| GatewayError::provider_not_found(&config.name))?;

        config.id = existing.id;
        config.created_at = existing.created_at;
        config.updated_at = Utc::now();
        *existing = config.clone();
        Ok(config)
    }

    async fn delete(&self, name: &str) -> GatewayResult<()> {
        self.inner
            .write()
            .await
            .rows
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| GatewayError::provider_not_found(name))
    }

    async fn exists_by_name(&self, name: &str) -> GatewayResult<bool> {
        Ok(self.inner.read().await.rows.contains_key(name))
    }
}

/// Append-only request log repository
#[derive(Debug, Default)]
pub struct InMemoryRequestLogRepository {
    rows: RwLock<Vec<RequestLog>>,
}

impl InMemoryRequestLogRepository {
    /// Create an empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All records in insertion order
    pub async fn all(&self) -> Vec<RequestLog> {
        self.rows.read().await.clone()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Whether no record is stored
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl RequestLogRepository for InMemoryRequestLogRepository {
    async fn create(&self, mut log: RequestLog) -> GatewayResult<RequestLog> {
        let mut rows = self.rows.write().await;
        log.id = Some(i64::try_from(rows.len()).unwrap_or(i64::MAX) + 1);
        rows.push(log.clone());
        Ok(log)
    }

    async fn list_recent(&self, limit: usize) -> GatewayResult<Vec<RequestLog>> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}

/// User repository backed by an id-ordered map
#[derive(Debug, Default)]
pub struct InMemoryUserRepository {
    inner: RwLock<UserTable>,
}

#[derive(Debug, Default)]
struct UserTable {
    next_id: i64,
    rows: BTreeMap<i64, User>,
}

impl InMemoryUserRepository {
    /// Create an empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create(&self, mut user: User) -> GatewayResult<User> {
        let mut table = self.inner.write().await;
        if table.rows.values().any(|u| u.name == user.name) {
            return Err(GatewayError::duplicate("user", &user.name));
        }

        table.next_id += 1;
        let now = Utc::now();
        user.id = Some(table.next_id);
        user.created_at = now;
        user.updated_at = now;
        let id = table.next_id;
        table.rows.insert(id, user.clone());
        Ok(user)
    }

    async fn get(&self, id: i64) -> GatewayResult<User> {
        self.inner
            .read()
            .await
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| GatewayError::not_found("user", id.to_string()))
    }

    async fn list(&self) -> GatewayResult<Vec<User>> {
        Ok(self.inner.read().await.rows.values().cloned().collect())
    }
}

/// API key repository backed by an id-ordered map
#[derive(Debug, Default)]
pub struct InMemoryApiKeyRepository {
    inner: RwLock<KeyTable>,
}

#[derive(Debug, Default)]
struct KeyTable {
    next_id: i64,
    rows: BTreeMap<i64, ApiKey>,
}

impl KeyTable {
    fn owned_mut(&mut self, user_id: i64, id: i64) -> GatewayResult<&mut ApiKey> {
        self.rows
            .get_mut(&id)
            .filter(|key| key.user_id == user_id)
            .ok_or_else(|| GatewayError::not_found("api key", id.to_string()))
    }
}

impl InMemoryApiKeyRepository {
    /// Create an empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApiKeyRepository for InMemoryApiKeyRepository {
    async fn create(&self, mut key: ApiKey) -> GatewayResult<ApiKey> {
        let mut table = self.inner.write().await;
        table.next_id += 1;
        let now = Utc::now();
        key.id = Some(table.next_id);
        key.created_at = now;
        key.updated_at = now;
        let id = table.next_id;
        table.rows.insert(id, key.clone());
        Ok(key)
    }

    async fn find_by_key(&self, key: &str) -> GatewayResult<Option<ApiKey>> {
        Ok(self
            .inner
            .read()
            .await
            .rows
            .values()
            .find(|stored| stored.key_str() == key)
            .cloned())
    }

    async fn list_by_user(&self, user_id: i64) -> GatewayResult<Vec<ApiKey>> {
        Ok(self
            .inner
            .read()
            .await
            .rows
            .values()
            .filter(|key| key.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn set_status(
        &self,
        user_id: i64,
        id: i64,
        status: ApiKeyStatus,
    ) -> GatewayResult<ApiKey> {
        let mut table = self.inner.write().await;
        let key = table.owned_mut(user_id, id)?;
        key.status = status;
        key.updated_at = Utc::now();
        Ok(key.clone())
    }

    async fn delete(&self, user_id: i64, id: i64) -> GatewayResult<()> {
        let mut table = self.inner.write().await;
        table.owned_mut(user_id, id)?;
        table.rows.remove(&id);
        Ok(())
    }

    async fn touch(&self, id: i64, at: DateTime<Utc>) -> GatewayResult<()> {
        if let Some(key) = self.inner.write().await.rows.get_mut(&id) {
            key.last_used_at = Some(at);
        }
        Ok(())
    }
}
