//! Chat relay.
//!
//! Resolves a provider by name in the [`InstanceStore`], drives one exchange
//! against the adapter it captured, and hands exactly one [`RequestLog`] per
//! exchange to the [`AsyncLogWriter`].
//!
//! A streaming exchange runs in its own task. Each step races the next
//! upstream item, and each forward to the caller, against the cancellation
//! token, so a caller that goes away is noticed at the next await point
//! even while the caller-facing buffer is full. The upstream stream is
//! dropped as soon as the exchange ends, which releases the connection.

use futures::StreamExt;
use gateway_core::{
    CallerId, ChatChunk, ChatRequest, ChatResponse, ChunkStream, GatewayError,
    GatewayResult, RequestLog, RequestStatus, Usage,
};
use gateway_providers::InstanceStore;
use gateway_telemetry::{AsyncLogWriter, Metrics};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn, Instrument};

/// Caller-facing event buffer per stream
pub const DEFAULT_STREAM_BUFFER: usize = 16;

const MODE_BUFFERED: &str = "buffered";
const MODE_STREAM: &str = "stream";

/// One event on the caller-facing side of a stream
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// An upstream chunk, forwarded unchanged
    Chunk(ChatChunk),
    /// The upstream failed; no events follow
    Error(GatewayError),
    /// The upstream completed; no events follow
    Done,
}

/// Outcome of a finished stream, as written to the request log
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSummary {
    /// Terminal status
    pub status: RequestStatus,
    /// Concatenated content of every chunk delivered to the caller
    pub content: String,
    /// Most recent usage the upstream reported
    pub usage: Option<Usage>,
    /// Error text for `error` and `interrupted` outcomes
    pub error: Option<String>,
    /// Chunks delivered to the caller
    pub chunks: usize,
    /// Time from start to terminal condition
    pub latency: Duration,
}

/// Handle to a running stream
#[derive(Debug)]
pub struct ChatStreamHandle {
    /// Events in upstream order, ending with `Done` or `Error`
    pub events: mpsc::Receiver<StreamEvent>,
    /// Resolves once the exchange is finalized and its log submitted
    pub summary: JoinHandle<StreamSummary>,
}

/// Per-exchange accumulation
struct Exchange {
    content: String,
    usage: Option<Usage>,
    chunks: usize,
}

impl Exchange {
    fn new() -> Self {
        Self {
            content: String::new(),
            usage: None,
            chunks: 0,
        }
    }

    fn delivered(&mut self, chunk: &ChatChunk) {
        self.content.push_str(&chunk.content());
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }
        self.chunks += 1;
    }
}

/// Relays chat exchanges to live adapters
#[derive(Clone)]
pub struct ChatRelay {
    store: Arc<InstanceStore>,
    log_writer: Arc<AsyncLogWriter>,
    metrics: Option<Metrics>,
    buffer: usize,
    streams: TaskTracker,
}

impl ChatRelay {
    /// Create a relay over the live store
    pub fn new(store: Arc<InstanceStore>, log_writer: Arc<AsyncLogWriter>) -> Self {
        Self {
            store,
            log_writer,
            metrics: None,
            buffer: DEFAULT_STREAM_BUFFER,
            streams: TaskTracker::new(),
        }
    }

    /// Record exchange outcomes in `metrics`
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Override the caller-facing buffer size (minimum one)
    #[must_use]
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// Streams still running
    #[must_use]
    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    /// Wait up to `timeout` for running streams to finalize their logs
    ///
    /// Returns false if some were still running. Streams started afterwards
    /// are still relayed but no longer awaited.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.streams.close();
        let drained = tokio::time::timeout(timeout, self.streams.wait())
            .await
            .is_ok();
        if !drained {
            warn!(active = self.streams.len(), "Streams still running after drain timeout");
        }
        drained
    }

    fn prepare(&self, provider: &str, mut request: ChatRequest) -> GatewayResult<ChatRequest> {
        request.validate()?;
        request.model = provider.to_string();
        Ok(request)
    }

    fn finish(&self, provider: &str, mode: &str, log: RequestLog, elapsed: Duration) {
        if let Some(metrics) = &self.metrics {
            metrics.record_chat(provider, mode, log.status.as_str(), elapsed);
        }
        self.log_writer.submit(log.with_latency(elapsed));
    }

    /// Run a buffered exchange
    ///
    /// # Errors
    /// `Validation` for a malformed request and `NotFound` if nothing is live
    /// under `provider`; neither is logged. Adapter failures are logged and
    /// returned as `Upstream`.
    #[instrument(skip_all, fields(caller = %caller, provider = %provider))]
    pub async fn chat(
        &self,
        caller: CallerId,
        provider: &str,
        request: ChatRequest,
    ) -> GatewayResult<ChatResponse> {
        let request = self.prepare(provider, request)?;
        let adapter = self.store.get(provider)?;
        let pending = PendingLog::new(
            self,
            provider,
            MODE_BUFFERED,
            RequestLog::new(caller, provider, &request.messages),
        );

        match adapter.chat(request).await {
            Ok(response) => {
                debug!(latency_ms = pending.elapsed_ms(), "Chat completed");
                pending.complete(|log| {
                    log.with_content(response.content())
                        .with_usage(response.usage)
                        .success()
                });
                Ok(response)
            }
            Err(e) => {
                warn!(error = %e, "Chat failed");
                let e = upstream_error(provider, e);
                pending.complete(|log| log.failed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Start a streaming exchange
    ///
    /// The returned handle yields chunks in upstream order followed by
    /// `Done`, or by `Error` if the upstream fails (including failure to open
    /// the stream). Cancelling `cancel` or dropping `events` interrupts the
    /// exchange.
    ///
    /// # Errors
    /// `Validation` for a malformed request and `NotFound` if nothing is live
    /// under `provider`; neither is logged.
    #[instrument(skip_all, fields(caller = %caller, provider = %provider))]
    pub fn chat_stream(
        &self,
        caller: CallerId,
        provider: &str,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> GatewayResult<ChatStreamHandle> {
        let request = self.prepare(provider, request)?;
        let adapter = self.store.get(provider)?;
        let (tx, rx) = mpsc::channel(self.buffer);

        let relay = self.clone();
        let provider = provider.to_string();
        let span = tracing::Span::current();

        let summary = self.streams.spawn(
            async move {
                let log = RequestLog::new(caller, &provider, &request.messages);
                let start = Instant::now();

                let opened = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    opened = adapter.chat_stream(request) => Some(opened),
                };

                let mut exchange = Exchange::new();
                let outcome = match opened {
                    None => Outcome::Interrupted,
                    Some(Err(e)) => {
                        warn!(error = %e, "Failed to open upstream stream");
                        let e = upstream_error(&provider, e);
                        forward(&tx, &cancel, StreamEvent::Error(e.clone())).await;
                        Outcome::Failed(e)
                    }
                    Some(Ok(upstream)) => {
                        relay_stream(&provider, upstream, &tx, &cancel, &mut exchange).await
                    }
                };
                drop(adapter);

                let elapsed = start.elapsed();
                let log = log.with_content(exchange.content.clone()).with_usage(exchange.usage);
                let (log, error) = match &outcome {
                    Outcome::Completed => (log.success(), None),
                    Outcome::Failed(e) => (log.failed(e.to_string()), Some(e.to_string())),
                    Outcome::Interrupted => {
                        let log = log.interrupted();
                        let error = log.error_message.clone();
                        (log, error)
                    }
                };
                let status = log.status;

                info!(
                    status = status.as_str(),
                    chunks = exchange.chunks,
                    latency_ms = elapsed.as_millis() as u64,
                    "Stream finished"
                );
                relay.finish(&provider, MODE_STREAM, log, elapsed);

                StreamSummary {
                    status,
                    content: exchange.content,
                    usage: exchange.usage,
                    error,
                    chunks: exchange.chunks,
                    latency: elapsed,
                }
            }
            .instrument(span),
        );

        Ok(ChatStreamHandle {
            events: rx,
            summary,
        })
    }
}

impl std::fmt::Debug for ChatRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatRelay")
            .field("live", &self.store.len())
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}

/// Adapter failures reach callers and logs as `Upstream`
fn upstream_error(provider: &str, error: GatewayError) -> GatewayError {
    match error {
        GatewayError::Upstream { .. } => error,
        other => GatewayError::upstream(provider, other.to_string()),
    }
}

/// A buffered exchange awaiting its log record.
///
/// Dropping it unfinished (the caller's future was dropped mid-call) writes
/// the record as `interrupted`.
struct PendingLog<'a> {
    relay: &'a ChatRelay,
    provider: &'a str,
    mode: &'static str,
    log: Option<RequestLog>,
    start: Instant,
}

impl<'a> PendingLog<'a> {
    fn new(relay: &'a ChatRelay, provider: &'a str, mode: &'static str, log: RequestLog) -> Self {
        Self {
            relay,
            provider,
            mode,
            log: Some(log),
            start: Instant::now(),
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn complete(mut self, finalize: impl FnOnce(RequestLog) -> RequestLog) {
        if let Some(log) = self.log.take() {
            self.relay
                .finish(self.provider, self.mode, finalize(log), self.start.elapsed());
        }
    }
}

impl Drop for PendingLog<'_> {
    fn drop(&mut self) {
        if let Some(log) = self.log.take() {
            warn!(provider = %self.provider, "Chat abandoned before upstream replied");
            self.relay
                .finish(self.provider, self.mode, log.interrupted(), self.start.elapsed());
        }
    }
}

enum Outcome {
    Completed,
    Failed(GatewayError),
    Interrupted,
}

/// Send an event unless the caller cancels first; false if it was not delivered
async fn forward(
    tx: &mpsc::Sender<StreamEvent>,
    cancel: &CancellationToken,
    event: StreamEvent,
) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        sent = tx.send(event) => sent.is_ok(),
    }
}

async fn relay_stream(
    provider: &str,
    mut upstream: ChunkStream,
    tx: &mpsc::Sender<StreamEvent>,
    cancel: &CancellationToken,
    exchange: &mut Exchange,
) -> Outcome {
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Outcome::Interrupted,
            next = upstream.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                if !forward(tx, cancel, StreamEvent::Chunk(chunk.clone())).await {
                    return Outcome::Interrupted;
                }
                exchange.delivered(&chunk);
            }
            Some(Err(e)) => {
                let e = upstream_error(provider, e);
                forward(tx, cancel, StreamEvent::Error(e.clone())).await;
                return Outcome::Failed(e);
            }
            None => {
                forward(tx, cancel, StreamEvent::Done).await;
                return Outcome::Completed;
            }
        }
    }
}
