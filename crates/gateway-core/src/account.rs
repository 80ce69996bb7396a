//! Users and the API keys issued to them.
//!
//! Keys are bearer credentials: a caller presenting an active, unexpired
//! key is recorded in request logs under the owning user's name.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Prefix of every issued key
pub const API_KEY_PREFIX: &str = "ck_";

/// A gateway user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Storage identifier, assigned on create
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Unique user name, used as the caller identity
    pub name: String,

    /// Contact address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Creation time
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// Last update time
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create an unsaved user
    #[must_use]
    pub fn new(name: impl Into<String>, email: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            name: name.into(),
            email,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Whether a key may authenticate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyStatus {
    /// Accepted
    Active,
    /// Rejected until deleted
    Disabled,
}

impl ApiKeyStatus {
    /// Status as stored text
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Disabled => "disabled",
        }
    }

    /// Parse stored text
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }
}

impl fmt::Display for ApiKeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bearer key owned by a user
#[derive(Debug, Clone, Serialize)]
pub struct ApiKey {
    /// Storage identifier, assigned on create
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Owning user
    pub user_id: i64,

    /// The bearer token; serialized only as a masked hint
    #[serde(serialize_with = "serialize_masked")]
    pub key: SecretString,

    /// Whether the key is accepted
    pub status: ApiKeyStatus,

    /// Last successful authentication
    pub last_used_at: Option<DateTime<Utc>>,

    /// Moment the key stops being accepted
    pub expires_at: Option<DateTime<Utc>>,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Last update time
    pub updated_at: DateTime<Utc>,
}

fn serialize_masked<S: Serializer>(key: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&mask(key.expose_secret()))
}

/// Prefix plus the last four characters, for listings
fn mask(key: &str) -> String {
    let tail: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("{API_KEY_PREFIX}...{tail}")
}

impl ApiKey {
    /// Create an unsaved active key
    #[must_use]
    pub fn new(user_id: i64, key: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            user_id,
            key: SecretString::new(key.into()),
            status: ApiKeyStatus::Active,
            last_used_at: None,
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    /// The token in clear text
    #[must_use]
    pub fn key_str(&self) -> &str {
        self.key.expose_secret()
    }

    /// Whether the key is past its expiry at `now`
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }

    /// Whether the key may authenticate at `now`
    #[must_use]
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.status == ApiKeyStatus::Active && !self.is_expired(now)
    }
}
