//! Repository traits for the persistence collaborators.
//!
//! Implementations live in `gateway-storage`. All traits assume strong
//! consistency on a single node.

use crate::account::{ApiKey, ApiKeyStatus, User};
use crate::config::ProviderConfig;
use crate::error::GatewayResult;
use crate::request_log::RequestLog;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Persistent store of provider configurations, keyed by name
#[async_trait]
pub trait ProviderRepository: Send + Sync {
    /// Insert a new record, assigning id and timestamps
    ///
    /// # Errors
    /// Returns `DuplicateName` if the name is taken, `Persistence` on storage failure
    async fn create(&self, config: ProviderConfig) -> GatewayResult<ProviderConfig>;

    /// Fetch a record by name
    ///
    /// # Errors
    /// Returns `NotFound` if no record has this name
    async fn get_by_name(&self, name: &str) -> GatewayResult<ProviderConfig>;

    /// All records ordered by name
    ///
    /// # Errors
    /// Returns `Persistence` on storage failure
    async fn list(&self) -> GatewayResult<Vec<ProviderConfig>>;

    /// Overwrite an existing record, bumping `updated_at`
    ///
    /// # Errors
    /// Returns `NotFound` if no record has this name
    async fn update(&self, config: ProviderConfig) -> GatewayResult<ProviderConfig>;

    /// Delete a record by name
    ///
    /// # Errors
    /// Returns `NotFound` if no record has this name
    async fn delete(&self, name: &str) -> GatewayResult<()>;

    /// Whether a record with this name exists
    ///
    /// # Errors
    /// Returns `Persistence` on storage failure
    async fn exists_by_name(&self, name: &str) -> GatewayResult<bool>;
}

/// Append-only store of chat exchange records
#[async_trait]
pub trait RequestLogRepository: Send + Sync {
    /// Append a record, returning it with its assigned id
    ///
    /// # Errors
    /// Returns `Persistence` on storage failure
    async fn create(&self, log: RequestLog) -> GatewayResult<RequestLog>;

    /// Most recent records first
    ///
    /// # Errors
    /// Returns `Persistence` on storage failure
    async fn list_recent(&self, limit: usize) -> GatewayResult<Vec<RequestLog>>;
}

/// Persistent store of users, keyed by id with unique names
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a new user, assigning id and timestamps
    ///
    /// # Errors
    /// Returns `DuplicateName` if the name is taken, `Persistence` on storage failure
    async fn create(&self, user: User) -> GatewayResult<User>;

    /// Fetch a user by id
    ///
    /// # Errors
    /// Returns `NotFound` if no user has this id
    async fn get(&self, id: i64) -> GatewayResult<User>;

    /// All users ordered by id
    ///
    /// # Errors
    /// Returns `Persistence` on storage failure
    async fn list(&self) -> GatewayResult<Vec<User>>;
}

/// Persistent store of issued API keys
#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    /// Insert a new key, assigning id and timestamps
    ///
    /// # Errors
    /// Returns `Persistence` on storage failure
    async fn create(&self, key: ApiKey) -> GatewayResult<ApiKey>;

    /// Look a key up by its token
    ///
    /// # Errors
    /// Returns `Persistence` on storage failure
    async fn find_by_key(&self, key: &str) -> GatewayResult<Option<ApiKey>>;

    /// Keys owned by a user, ordered by id
    ///
    /// # Errors
    /// Returns `Persistence` on storage failure
    async fn list_by_user(&self, user_id: i64) -> GatewayResult<Vec<ApiKey>>;

    /// Change the status of a key owned by `user_id`
    ///
    /// # Errors
    /// Returns `NotFound` if the user owns no key with this id
    async fn set_status(
        &self,
        user_id: i64,
        id: i64,
        status: ApiKeyStatus,
    ) -> GatewayResult<ApiKey>;

    /// Delete a key owned by `user_id`
    ///
    /// # Errors
    /// Returns `NotFound` if the user owns no key with this id
    async fn delete(&self, user_id: i64, id: i64) -> GatewayResult<()>;

    /// Record a successful authentication
    ///
    /// # Errors
    /// Returns `Persistence` on storage failure
    async fn touch(&self, id: i64, at: DateTime<Utc>) -> GatewayResult<()>;
}
