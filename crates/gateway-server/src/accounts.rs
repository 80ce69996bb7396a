//! User and API key management.
//!
//! Admins create users and issue `ck_` keys to them. With
//! `auth.managed_keys` on, those keys authenticate chat requests under the
//! owning user's name.

use chrono::{DateTime, Utc};
use gateway_core::{
    ApiKey, ApiKeyRepository, ApiKeyStatus, GatewayError, GatewayResult, User, UserRepository,
    API_KEY_PREFIX,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Hex characters of randomness in an issued key
const KEY_HEX_LEN: usize = 48;

/// Fresh random key: the prefix followed by hex
fn generate_key() -> String {
    let mut hex = String::with_capacity(KEY_HEX_LEN + 32);
    while hex.len() < KEY_HEX_LEN {
        hex.push_str(&Uuid::new_v4().simple().to_string());
    }
    hex.truncate(KEY_HEX_LEN);
    format!("{API_KEY_PREFIX}{hex}")
}

/// User and key operations over the account repositories
#[derive(Clone)]
pub struct AccountService {
    users: Arc<dyn UserRepository>,
    keys: Arc<dyn ApiKeyRepository>,
}

impl std::fmt::Debug for AccountService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountService").finish_non_exhaustive()
    }
}

impl AccountService {
    /// Create a service over the given repositories
    pub fn new(users: Arc<dyn UserRepository>, keys: Arc<dyn ApiKeyRepository>) -> Self {
        Self { users, keys }
    }

    /// Create a user with a unique name
    ///
    /// # Errors
    /// Returns `Validation` for an empty name, `DuplicateName` if taken
    #[instrument(skip(self, email))]
    pub async fn create_user(&self, name: &str, email: Option<String>) -> GatewayResult<User> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GatewayError::validation("user name cannot be empty", Some("name")));
        }
        let user = self.users.create(User::new(name, email)).await?;
        info!(user_id = ?user.id, "User created");
        Ok(user)
    }

    /// Fetch one user
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown id
    pub async fn get_user(&self, id: i64) -> GatewayResult<User> {
        self.users.get(id).await
    }

    /// All users
    ///
    /// # Errors
    /// Returns `Persistence` on storage failure
    pub async fn list_users(&self) -> GatewayResult<Vec<User>> {
        self.users.list().await
    }

    /// Issue a new active key to a user
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown user, `Validation` for an expiry
    /// that has already passed
    #[instrument(skip(self))]
    pub async fn issue_key(
        &self,
        user_id: i64,
        expires_at: Option<DateTime<Utc>>,
    ) -> GatewayResult<ApiKey> {
        self.users.get(user_id).await?;
        if expires_at.is_some_and(|expires| expires <= Utc::now()) {
            return Err(GatewayError::validation(
                "expires_at must be in the future",
                Some("expires_at"),
            ));
        }

        let key = self
            .keys
            .create(ApiKey::new(user_id, generate_key(), expires_at))
            .await?;
        info!(key_id = ?key.id, "API key issued");
        Ok(key)
    }

    /// Keys owned by a user
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown user
    pub async fn list_keys(&self, user_id: i64) -> GatewayResult<Vec<ApiKey>> {
        self.users.get(user_id).await?;
        self.keys.list_by_user(user_id).await
    }

    /// Stop accepting a key
    ///
    /// # Errors
    /// Returns `NotFound` unless the user owns the key
    #[instrument(skip(self))]
    pub async fn disable_key(&self, user_id: i64, key_id: i64) -> GatewayResult<ApiKey> {
        let key = self
            .keys
            .set_status(user_id, key_id, ApiKeyStatus::Disabled)
            .await?;
        info!("API key disabled");
        Ok(key)
    }

    /// Delete a key
    ///
    /// # Errors
    /// Returns `NotFound` unless the user owns the key
    #[instrument(skip(self))]
    pub async fn delete_key(&self, user_id: i64, key_id: i64) -> GatewayResult<()> {
        self.keys.delete(user_id, key_id).await?;
        info!("API key deleted");
        Ok(())
    }

    /// Resolve a bearer token to its owner
    ///
    /// Unknown, disabled and expired keys resolve to `None`. A failure to
    /// record last use does not reject the request.
    ///
    /// # Errors
    /// Returns `Persistence` when the lookup itself fails
    pub async fn authenticate(&self, token: &str) -> GatewayResult<Option<User>> {
        let Some(key) = self.keys.find_by_key(token).await? else {
            return Ok(None);
        };
        let now = Utc::now();
        if !key.is_usable(now) {
            return Ok(None);
        }

        if let Some(id) = key.id {
            if let Err(e) = self.keys.touch(id, now).await {
                warn!(key_id = id, error = %e, "Failed to record API key use");
            }
        }

        match self.users.get(key.user_id).await {
            Ok(user) => Ok(Some(user)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
