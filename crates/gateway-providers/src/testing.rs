//! Scripted in-process adapters for tests.
//!
//! A [`ScriptedAdapter`] replays a fixed list of [`ScriptStep`]s instead of
//! talking to a network upstream, which makes relay and lifecycle behavior
//! deterministic under test.

use crate::factory::AdapterFactory;
use async_trait::async_trait;
use futures::StreamExt;
use gateway_core::{
    AdapterHandle, AdapterType, ChatChunk, ChatRequest, ChatResponse, Choice, ChunkStream,
    GatewayError, GatewayResult, MessageRole, ProviderAdapter, ProviderConfig, ResponseMessage,
    Usage,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// One step of a scripted upstream exchange
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Emit a chunk
    Chunk(ChatChunk),
    /// Emit an error and end the stream
    Error(GatewayError),
    /// Pause before the next step
    Sleep(Duration),
    /// Block until the notify is signalled
    Wait(Arc<Notify>),
    /// Never make progress again
    Hang,
}

impl ScriptStep {
    /// Chunk carrying a content delta
    pub fn text(content: impl Into<String>) -> Self {
        Self::Chunk(ChatChunk::text(content))
    }

    /// Upstream error step
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(GatewayError::upstream("scripted", message))
    }
}

/// Counters shared between an adapter and the test observing it
#[derive(Debug, Default)]
pub struct AdapterCounters {
    chat_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    released: AtomicUsize,
}

impl AdapterCounters {
    /// Buffered calls made
    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    /// Streams opened
    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// Streams dropped, i.e. upstream connections released
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

struct ReleaseGuard(Arc<AdapterCounters>);

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.0.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Adapter replaying a fixed script
#[derive(Debug, Clone)]
pub struct ScriptedAdapter {
    name: String,
    adapter_type: AdapterType,
    label: String,
    steps: Vec<ScriptStep>,
    open_error: Option<GatewayError>,
    counters: Arc<AdapterCounters>,
}

impl ScriptedAdapter {
    /// Create an adapter with an empty script
    pub fn new(name: impl Into<String>, adapter_type: impl Into<AdapterType>) -> Self {
        Self {
            name: name.into(),
            adapter_type: adapter_type.into(),
            label: String::new(),
            steps: Vec::new(),
            open_error: None,
            counters: Arc::new(AdapterCounters::default()),
        }
    }

    /// Replace the script
    #[must_use]
    pub fn with_steps(mut self, steps: Vec<ScriptStep>) -> Self {
        self.steps = steps;
        self
    }

    /// Script one text chunk per item
    #[must_use]
    pub fn with_text<I, S>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps = chunks.into_iter().map(ScriptStep::text).collect();
        self
    }

    /// Append a final chunk reporting usage
    #[must_use]
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.steps
            .push(ScriptStep::Chunk(ChatChunk::default().with_usage(usage)));
        self
    }

    /// Fail every call before producing anything
    #[must_use]
    pub fn with_open_error(mut self, error: GatewayError) -> Self {
        self.open_error = Some(error);
        self
    }

    /// Label reported as the response model, used to tell snapshots apart
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Counters for this adapter
    pub fn counters(&self) -> Arc<AdapterCounters> {
        Arc::clone(&self.counters)
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn adapter_type(&self) -> &AdapterType {
        &self.adapter_type
    }

    async fn chat(&self, _request: ChatRequest) -> GatewayResult<ChatResponse> {
        self.counters.chat_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.open_error {
            return Err(err.clone());
        }

        let mut content = String::new();
        let mut usage = None;
        for step in &self.steps {
            match step {
                ScriptStep::Chunk(chunk) => {
                    content.push_str(&chunk.content());
                    if chunk.usage.is_some() {
                        usage = chunk.usage;
                    }
                }
                ScriptStep::Error(err) => return Err(err.clone()),
                ScriptStep::Sleep(duration) => tokio::time::sleep(*duration).await,
                ScriptStep::Wait(notify) => notify.notified().await,
                ScriptStep::Hang => futures::future::pending::<()>().await,
            }
        }

        Ok(ChatResponse {
            id: format!("scripted-{}", self.name),
            object: "chat.completion".to_string(),
            created: 0,
            model: self.label.clone(),
            choices: vec![Choice {
                index: 0,
                message: ResponseMessage {
                    role: MessageRole::Assistant,
                    content,
                },
                finish_reason: Some("stop".to_string()),
            }],
            usage,
            extra: HashMap::new(),
        })
    }

    async fn chat_stream(&self, _request: ChatRequest) -> GatewayResult<ChunkStream> {
        self.counters.stream_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.open_error {
            return Err(err.clone());
        }

        let steps = self.steps.clone();
        let guard = ReleaseGuard(Arc::clone(&self.counters));

        let stream = async_stream::stream! {
            let _guard = guard;
            for step in steps {
                match step {
                    ScriptStep::Chunk(chunk) => {
                        yield Ok(chunk);
                    }
                    ScriptStep::Error(err) => {
                        yield Err(err);
                        break;
                    }
                    ScriptStep::Sleep(duration) => tokio::time::sleep(duration).await,
                    ScriptStep::Wait(notify) => notify.notified().await,
                    ScriptStep::Hang => futures::future::pending::<()>().await,
                }
            }
        };

        Ok(stream.boxed())
    }
}

/// Factory building [`ScriptedAdapter`]s.
///
/// Built adapters report the config's `base_url` as their label and, unless a
/// script is given, emit it as their only chunk. Construction fails when the
/// base URL is empty or `extra_config.fail` is `true`.
#[derive(Debug)]
pub struct ScriptedFactory {
    adapter_type: AdapterType,
    steps: Option<Vec<ScriptStep>>,
    always_fail: bool,
    builds: AtomicUsize,
}

impl ScriptedFactory {
    /// Factory producing adapters of the given type
    pub fn new(adapter_type: impl Into<AdapterType>) -> Self {
        Self {
            adapter_type: adapter_type.into(),
            steps: None,
            always_fail: false,
            builds: AtomicUsize::new(0),
        }
    }

    /// Script used by every built adapter
    #[must_use]
    pub fn with_steps(mut self, steps: Vec<ScriptStep>) -> Self {
        self.steps = Some(steps);
        self
    }

    /// Make every construction fail
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.always_fail = true;
        self
    }

    /// Successful constructions so far
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl AdapterFactory for ScriptedFactory {
    fn create(&self, config: &ProviderConfig) -> GatewayResult<AdapterHandle> {
        let fail_flag = config
            .extra_config
            .get("fail")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);

        if self.always_fail || fail_flag {
            return Err(GatewayError::adapter_init(&config.name, "scripted construction failure"));
        }
        if config.base_url.is_empty() {
            return Err(GatewayError::adapter_init(&config.name, "base_url is required"));
        }

        let steps = self
            .steps
            .clone()
            .unwrap_or_else(|| vec![ScriptStep::text(config.base_url.clone())]);

        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(
            ScriptedAdapter::new(&config.name, self.adapter_type.clone())
                .with_steps(steps)
                .with_label(&config.base_url),
        ))
    }
}

/// Collect a chunk stream into its items
pub async fn collect_stream(stream: ChunkStream) -> Vec<GatewayResult<ChatChunk>> {
    stream.collect().await
}
