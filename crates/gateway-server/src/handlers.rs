//! HTTP request handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use axum::body::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use gateway_chat::StreamEvent;
use gateway_core::{ApiKey, ApiKeyStatus, ChatRequest, ProviderConfig, ProviderUpdate, User};
use gateway_providers::ProviderStatus;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::accounts::AccountService;
use crate::error::ApiError;
use crate::extractors::{CurrentCaller, JsonBody, RequestId};
use crate::state::AppState;

/// SSE end-of-stream marker
pub const DONE_MARKER: &str = "[DONE]";

/// Chat with the provider named in the path
///
/// Buffered requests return the upstream response as JSON. With
/// `"stream": true` the response is an SSE stream of chunk events ending in
/// `[DONE]`, or in an `{"error": ...}` event if the upstream fails.
#[instrument(skip_all, fields(request_id = %request_id, provider = %provider))]
pub async fn chat(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    CurrentCaller(caller): CurrentCaller,
    RequestId(request_id): RequestId,
    JsonBody(request): JsonBody<ChatRequest>,
) -> Result<Response, ApiError> {
    if !request.stream {
        let response = state.relay.chat(caller.id, &provider, request).await?;
        return Ok(Json(response).into_response());
    }

    let cancel = CancellationToken::new();
    let handle = state
        .relay
        .chat_stream(caller.id, &provider, request, cancel.clone())?;

    Ok(Sse::new(sse_events(handle.events, cancel))
        .keep_alive(KeepAlive::default())
        .into_response())
}

/// Turn relay events into SSE events
///
/// The drop guard rides along with the stream state, so the exchange is
/// cancelled when the response body is dropped on client disconnect.
fn sse_events(
    events: tokio::sync::mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(
        (events, cancel.drop_guard(), false),
        |(mut events, guard, finished)| async move {
            if finished {
                return None;
            }
            let event = events.recv().await?;
            let (sse, finished) = match event {
                StreamEvent::Chunk(chunk) => (
                    Event::default().data(serde_json::to_string(&chunk).unwrap_or_default()),
                    false,
                ),
                StreamEvent::Error(err) => {
                    let body = json!({
                        "error": {
                            "type": err.error_type(),
                            "message": err.to_string(),
                        }
                    });
                    (Event::default().data(body.to_string()), true)
                }
                StreamEvent::Done => (Event::default().data(DONE_MARKER), true),
            };
            Some((Ok(sse), (events, guard, finished)))
        },
    )
}

#[derive(Debug, Serialize)]
struct ModelEntry {
    name: String,
    #[serde(rename = "type")]
    adapter_type: String,
}

/// List live providers
pub async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    let data: Vec<ModelEntry> = state
        .manager
        .store()
        .list()
        .iter()
        .map(|adapter| ModelEntry {
            name: adapter.name().to_string(),
            adapter_type: adapter.adapter_type().as_str().to_string(),
        })
        .collect();

    Json(json!({ "data": data }))
}

/// Create a provider record and bring it live if enabled
pub async fn create_provider(
    State(state): State<AppState>,
    JsonBody(config): JsonBody<ProviderConfig>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state.manager.create_provider(config).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// List provider records with their live state
pub async fn list_providers(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProviderStatus>>, ApiError> {
    Ok(Json(state.manager.list_with_status().await?))
}

/// Get one provider record with its live state
pub async fn get_provider(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ProviderStatus>, ApiError> {
    let config = state.manager.get_config(&name).await?;
    let live_type = state
        .manager
        .get_provider(&name)
        .ok()
        .map(|adapter| adapter.adapter_type().clone());

    Ok(Json(ProviderStatus {
        config,
        live: live_type.is_some(),
        live_type,
    }))
}

/// Update a provider record and reload it
pub async fn update_provider(
    State(state): State<AppState>,
    Path(name): Path<String>,
    JsonBody(update): JsonBody<ProviderUpdate>,
) -> Result<Json<ProviderConfig>, ApiError> {
    if update.is_empty() {
        return Err(ApiError::bad_request("Update must change at least one field"));
    }
    Ok(Json(state.manager.update_provider(&name, update).await?))
}

/// Delete a provider record and its live adapter
pub async fn delete_provider(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.manager.delete_provider(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Reload every provider; 207 when some failed
pub async fn reload_all(State(state): State<AppState>) -> Result<Response, ApiError> {
    let report = state.manager.reload_all().await?;
    let status = if report.is_success() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    info!(
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        "Reload requested over HTTP"
    );
    Ok((status, Json(report)).into_response())
}

/// Reload one provider
pub async fn reload_provider(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.manager.reload(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Enable one provider
pub async fn enable_provider(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.manager.enable(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Disable one provider
pub async fn disable_provider(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.manager.disable(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn accounts(state: &AppState) -> Result<&AccountService, ApiError> {
    state
        .accounts
        .as_ref()
        .ok_or_else(|| ApiError::service_unavailable("Account storage is not configured"))
}

/// New user
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    /// Unique name
    pub name: String,
    /// Contact address
    #[serde(default)]
    pub email: Option<String>,
}

/// Key issuance options; the body may be empty
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IssueKeyRequest {
    /// Moment the key stops being accepted
    pub expires_at: Option<DateTime<Utc>>,
}

/// A freshly issued key; the only response carrying the key in clear
#[derive(Debug, Serialize)]
pub struct IssuedKey {
    /// Key id
    pub id: Option<i64>,
    /// Owning user
    pub user_id: i64,
    /// Bearer token
    pub key: String,
    /// Always active
    pub status: ApiKeyStatus,
    /// Expiry, if any
    pub expires_at: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl From<ApiKey> for IssuedKey {
    fn from(key: ApiKey) -> Self {
        Self {
            id: key.id,
            user_id: key.user_id,
            key: key.key_str().to_string(),
            status: key.status,
            expires_at: key.expires_at,
            created_at: key.created_at,
        }
    }
}

/// Create a user
pub async fn create_user(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = accounts(&state)?
        .create_user(&request.name, request.email)
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// List users
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, ApiError> {
    Ok(Json(accounts(&state)?.list_users().await?))
}

/// Get one user
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(accounts(&state)?.get_user(user_id).await?))
}

/// Issue a key to a user
pub async fn issue_key(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request: IssueKeyRequest = if body.is_empty() {
        IssueKeyRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("Invalid JSON: {e}")))?
    };

    let key = accounts(&state)?
        .issue_key(user_id, request.expires_at)
        .await?;
    Ok((StatusCode::CREATED, Json(IssuedKey::from(key))))
}

/// List a user's keys, masked
pub async fn list_keys(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<Vec<ApiKey>>, ApiError> {
    Ok(Json(accounts(&state)?.list_keys(user_id).await?))
}

/// Delete a user's key
pub async fn delete_key(
    State(state): State<AppState>,
    Path((user_id, key_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    accounts(&state)?.delete_key(user_id, key_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Disable a user's key
pub async fn disable_key(
    State(state): State<AppState>,
    Path((user_id, key_id)): Path<(i64, i64)>,
) -> Result<Json<ApiKey>, ApiError> {
    Ok(Json(accounts(&state)?.disable_key(user_id, key_id).await?))
}

/// Liveness
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "live_providers": state.manager.store().len(),
        "request_logs": state.log_writer.stats(),
    }))
}

/// Readiness: at least one live provider
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let live = state.manager.store().len();
    let (status, label) = if live > 0 {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    };
    (status, Json(json!({ "status": label, "live_providers": live })))
}

/// Prometheus text exposition
pub async fn metrics_endpoint(State(state): State<AppState>) -> Result<Response, ApiError> {
    state.metrics.set_live_providers(state.manager.store().len());
    let body = state
        .metrics
        .render()
        .map_err(|e| ApiError::internal(format!("Failed to render metrics: {e}")))?;

    Ok((
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
        .into_response())
}
