//! API key authentication.
//!
//! Requests carry `Authorization: Bearer <key>`. A [`CallerResolver`] maps
//! the key to a [`Caller`], which the middleware stores in the request
//! extensions for handlers and the admin guard to read.
//!
//! With no keys configured, every request resolves to the anonymous caller
//! with admin rights. [`AccountKeyResolver`] additionally accepts keys
//! issued to users through the account API.

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use gateway_config::AuthSettings;
use gateway_core::CallerId;
use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::accounts::AccountService;
use crate::state::AppState;

/// Authenticated identity attached to a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// Identity recorded in request logs
    pub id: CallerId,
    /// Whether admin routes are allowed
    pub admin: bool,
}

impl Caller {
    /// Non-admin caller
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: CallerId::new(id),
            admin: false,
        }
    }

    /// Admin caller
    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            id: CallerId::new(id),
            admin: true,
        }
    }

    /// Caller used when authentication is disabled
    pub fn anonymous() -> Self {
        Self {
            id: CallerId::anonymous(),
            admin: true,
        }
    }
}

/// Authentication errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No bearer token on the request
    #[error("Authentication required")]
    MissingCredentials,

    /// Token not recognized
    #[error("Invalid API key")]
    InvalidApiKey,

    /// Caller lacks admin rights
    #[error("Admin API key required")]
    AdminRequired,

    /// Key lookup failed
    #[error("Authentication backend unavailable")]
    Unavailable,
}

impl AuthError {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingCredentials | Self::InvalidApiKey => StatusCode::UNAUTHORIZED,
            Self::AdminRequired => StatusCode::FORBIDDEN,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Error code for the response body
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "authentication_required",
            Self::InvalidApiKey => "invalid_api_key",
            Self::AdminRequired => "permission_denied",
            Self::Unavailable => "service_unavailable",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": {
                "type": self.error_code(),
                "message": self.to_string(),
            }
        });

        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                header::HeaderValue::from_static("Bearer realm=\"api\""),
            );
        }
        response
    }
}

/// Maps a bearer token to a caller
#[async_trait]
pub trait CallerResolver: Send + Sync {
    /// Resolve `token`, which is `None` when the request carried none
    async fn resolve(&self, token: Option<&str>) -> Result<Caller, AuthError>;
}

/// Static key table built from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticKeyResolver {
    keys: HashMap<String, Caller>,
}

impl StaticKeyResolver {
    /// Resolver with no keys; authentication disabled
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `auth` settings section
    pub fn from_settings(settings: &AuthSettings) -> Self {
        let keys = settings
            .keys
            .iter()
            .map(|entry| {
                let caller = Caller {
                    id: CallerId::new(&entry.caller),
                    admin: entry.admin,
                };
                (entry.key.expose_secret().clone(), caller)
            })
            .collect();
        Self { keys }
    }

    /// Accept `key` as `caller`
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>, caller: Caller) -> Self {
        self.keys.insert(key.into(), caller);
        self
    }

    /// Whether any key is configured
    pub fn is_enabled(&self) -> bool {
        !self.keys.is_empty()
    }

    fn lookup(&self, token: &str) -> Option<Caller> {
        self.keys.get(token).cloned()
    }
}

#[async_trait]
impl CallerResolver for StaticKeyResolver {
    async fn resolve(&self, token: Option<&str>) -> Result<Caller, AuthError> {
        if !self.is_enabled() {
            return Ok(Caller::anonymous());
        }
        let token = token.ok_or(AuthError::MissingCredentials)?;
        self.lookup(token).ok_or(AuthError::InvalidApiKey)
    }
}

/// Configured keys first, then keys issued to users
///
/// Issued keys never carry admin rights; the caller identity is the
/// owning user's name.
#[derive(Debug, Clone)]
pub struct AccountKeyResolver {
    configured: StaticKeyResolver,
    accounts: AccountService,
}

impl AccountKeyResolver {
    /// Combine configured keys with the account store
    pub fn new(configured: StaticKeyResolver, accounts: AccountService) -> Self {
        Self {
            configured,
            accounts,
        }
    }
}

#[async_trait]
impl CallerResolver for AccountKeyResolver {
    async fn resolve(&self, token: Option<&str>) -> Result<Caller, AuthError> {
        let token = token.ok_or(AuthError::MissingCredentials)?;
        if let Some(caller) = self.configured.lookup(token) {
            return Ok(caller);
        }

        match self.accounts.authenticate(token).await {
            Ok(Some(user)) => Ok(Caller::new(user.name)),
            Ok(None) => Err(AuthError::InvalidApiKey),
            Err(e) => {
                warn!(error = %e, "API key lookup failed");
                Err(AuthError::Unavailable)
            }
        }
    }
}

/// Shared resolver handle
pub type SharedResolver = Arc<dyn CallerResolver>;

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Resolve the caller and attach it to the request
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let resolved = state.resolver.resolve(bearer_token(&request)).await;

    match resolved {
        Ok(caller) => {
            debug!(caller = %caller.id, admin = caller.admin, "Request authenticated");
            request.extensions_mut().insert(caller);
            next.run(request).await
        }
        Err(err) => {
            warn!(error = %err, path = %request.uri().path(), "Authentication failed");
            err.into_response()
        }
    }
}

/// Reject callers without admin rights; runs after [`auth_middleware`]
pub async fn require_admin(request: Request, next: Next) -> Response {
    match request.extensions().get::<Caller>() {
        Some(caller) if caller.admin => next.run(request).await,
        Some(caller) => {
            warn!(caller = %caller.id, path = %request.uri().path(), "Admin route denied");
            AuthError::AdminRequired.into_response()
        }
        None => AuthError::MissingCredentials.into_response(),
    }
}
