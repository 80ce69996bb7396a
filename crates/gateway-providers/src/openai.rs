//! OpenAI-compatible pass-through adapter.
//!
//! Forwards the gateway's chat schema unchanged to `{base_url}/chat/completions`.
//! OpenAI, vLLM and Ollama all speak this schema, so one adapter serves all
//! three type tags.

use crate::factory::{AdapterFactory, AdapterFactoryRegistry};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use gateway_core::{
    AdapterHandle, AdapterType, ChatChunk, ChatRequest, ChatResponse, ChunkStream, GatewayError,
    GatewayResult, ProviderAdapter, ProviderConfig,
};
use reqwest::{Client, RequestBuilder};
use reqwest_eventsource::{Event, EventSource};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};
use url::Url;

/// Marker the upstream sends after the last chunk
const STREAM_DONE: &str = "[DONE]";

/// Adapter for any endpoint exposing the OpenAI chat completions API
pub struct OpenAiCompatibleAdapter {
    name: String,
    adapter_type: AdapterType,
    endpoint: Url,
    api_key: Option<SecretString>,
    model_override: Option<String>,
    timeout: Duration,
    client: Client,
}

impl OpenAiCompatibleAdapter {
    /// Build an adapter bound to `config`
    ///
    /// # Errors
    /// Returns `AdapterInit` if the base URL is empty or unparseable, or the
    /// HTTP client cannot be created
    pub fn new(config: &ProviderConfig) -> GatewayResult<Self> {
        if config.base_url.trim().is_empty() {
            return Err(GatewayError::adapter_init(&config.name, "base_url is required"));
        }

        let endpoint = Self::completions_url(&config.base_url)
            .map_err(|e| GatewayError::adapter_init(&config.name, format!("invalid base_url: {e}")))?;

        let timeout = config.effective_timeout();
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(32)
            .build()
            .map_err(|e| {
                GatewayError::adapter_init(&config.name, format!("Failed to create HTTP client: {e}"))
            })?;

        let model_override = config
            .extra_config
            .get("model")
            .and_then(serde_json::Value::as_str)
            .map(ToString::to_string);

        debug!(
            provider = %config.name,
            endpoint = %endpoint,
            timeout_secs = timeout.as_secs(),
            "OpenAI-compatible adapter created"
        );

        Ok(Self {
            name: config.name.clone(),
            adapter_type: config.adapter_type.clone(),
            endpoint,
            api_key: config.api_key.clone(),
            model_override,
            timeout,
            client,
        })
    }

    fn completions_url(base_url: &str) -> Result<Url, url::ParseError> {
        let base = base_url.trim().trim_end_matches('/');
        Url::parse(&format!("{base}/chat/completions"))
    }

    /// The resolved chat completions endpoint
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn prepare(&self, mut request: ChatRequest, stream: bool) -> ChatRequest {
        if let Some(model) = &self.model_override {
            request.model.clone_from(model);
        }
        request.stream = stream;
        request
    }

    fn post(&self, request: &ChatRequest) -> RequestBuilder {
        let builder = self
            .client
            .post(self.endpoint.clone())
            .header("Content-Type", "application/json")
            .json(request);

        match &self.api_key {
            Some(key) => builder.bearer_auth(key.expose_secret()),
            None => builder,
        }
    }

    fn map_request_error(&self, err: &reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            return GatewayError::upstream(
                &self.name,
                format!("request timed out after {}s", self.timeout.as_secs()),
            );
        }
        match err.status() {
            Some(status) => GatewayError::upstream_status(
                &self.name,
                format!("Request failed: {err}"),
                status.as_u16(),
            ),
            None => GatewayError::upstream(&self.name, format!("Request failed: {err}")),
        }
    }
}

/// Turn one SSE `data:` payload into a chunk, surfacing in-band error objects
fn parse_chunk(provider: &str, data: &str) -> Option<GatewayResult<ChatChunk>> {
    let value: serde_json::Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => {
            warn!(provider = %provider, error = %e, data = %data, "Failed to parse stream chunk");
            return None;
        }
    };

    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map_or_else(|| err.to_string(), ToString::to_string);
        return Some(Err(GatewayError::upstream(provider, message)));
    }

    match serde_json::from_value::<ChatChunk>(value) {
        Ok(chunk) => Some(Ok(chunk)),
        Err(e) => {
            warn!(provider = %provider, error = %e, "Unexpected stream chunk shape");
            None
        }
    }
}

async fn map_eventsource_error(provider: &str, err: reqwest_eventsource::Error) -> GatewayError {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            let body = response.text().await.unwrap_or_default();
            GatewayError::upstream_status(
                provider,
                format!("upstream returned {status}: {body}"),
                status.as_u16(),
            )
        }
        other => GatewayError::upstream(provider, format!("Stream error: {other}")),
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn adapter_type(&self) -> &AdapterType {
        &self.adapter_type
    }

    async fn chat(&self, request: ChatRequest) -> GatewayResult<ChatResponse> {
        let request = self.prepare(request, false);
        debug!(provider = %self.name, model = %request.model, "Sending chat request");

        let response = self
            .post(&request)
            .send()
            .await
            .map_err(|e| self.map_request_error(&e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::upstream_status(
                &self.name,
                format!("upstream returned {status}: {body}"),
                status.as_u16(),
            ));
        }

        response.json::<ChatResponse>().await.map_err(|e| {
            GatewayError::upstream(&self.name, format!("Failed to parse response: {e}"))
        })
    }

    async fn chat_stream(&self, request: ChatRequest) -> GatewayResult<ChunkStream> {
        let request = self.prepare(request, true);
        debug!(provider = %self.name, model = %request.model, "Opening chat stream");

        let mut es = EventSource::new(self.post(&request)).map_err(|e| {
            GatewayError::upstream(&self.name, format!("Failed to create event source: {e}"))
        })?;

        // Wait for the handshake so a rejected request fails here rather than mid-stream.
        match es.next().await {
            Some(Ok(Event::Open)) => trace!(provider = %self.name, "Stream opened"),
            Some(Ok(Event::Message(_))) => {
                es.close();
                return Err(GatewayError::upstream(&self.name, "stream produced data before opening"));
            }
            Some(Err(e)) => {
                es.close();
                return Err(map_eventsource_error(&self.name, e).await);
            }
            None => {
                return Err(GatewayError::upstream(&self.name, "stream closed before opening"));
            }
        }

        let provider = self.name.clone();
        let stream = try_stream! {
            while let Some(event) = es.next().await {
                match event {
                    Ok(Event::Open) => {}
                    Ok(Event::Message(msg)) => {
                        let data = msg.data.trim();
                        if data == STREAM_DONE {
                            break;
                        }
                        if let Some(chunk) = parse_chunk(&provider, data) {
                            yield chunk?;
                        }
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(e) => {
                        error!(provider = %provider, error = %e, "Upstream stream error");
                        es.close();
                        Err::<(), _>(map_eventsource_error(&provider, e).await)?;
                    }
                }
            }
            es.close();
        };

        Ok(stream.boxed())
    }
}

impl std::fmt::Debug for OpenAiCompatibleAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleAdapter")
            .field("name", &self.name)
            .field("adapter_type", &self.adapter_type)
            .field("endpoint", &self.endpoint.as_str())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Factory for [`OpenAiCompatibleAdapter`]
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiCompatibleFactory;

impl AdapterFactory for OpenAiCompatibleFactory {
    fn create(&self, config: &ProviderConfig) -> GatewayResult<AdapterHandle> {
        Ok(Arc::new(OpenAiCompatibleAdapter::new(config)?))
    }
}

/// Factory table with every built-in adapter type
#[must_use]
pub fn default_factories() -> AdapterFactoryRegistry {
    let factory: Arc<dyn AdapterFactory> = Arc::new(OpenAiCompatibleFactory);
    AdapterFactoryRegistry::new()
        .with_factory(AdapterType::OPENAI, Arc::clone(&factory))
        .with_factory(AdapterType::VLLM, Arc::clone(&factory))
        .with_factory(AdapterType::OLLAMA, factory)
}
