//! Test helper utilities for integration tests

use gateway_core::{ChatMessage, ChatRequest, RequestLog};
use gateway_providers::{AdapterFactoryRegistry, InstanceStore, ProviderManager};
use gateway_server::{AppState, Server, ServerConfig};
use gateway_storage::{InMemoryProviderRepository, InMemoryRequestLogRepository};
use gateway_telemetry::{AsyncLogWriter, Metrics, MetricsConfig};
use once_cell::sync::Lazy;
use reqwest::{Client, Response};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Initialize tracing for tests (only once)
static TRACING: Lazy<()> = Lazy::new(|| {
    if std::env::var("TEST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
});

/// Initialize tracing for tests
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

/// A single-message chat request
pub fn chat_request(text: &str) -> ChatRequest {
    ChatRequest::builder()
        .message(ChatMessage::user(text))
        .build()
        .expect("valid request")
}

/// Gateway components wired over in-memory storage
pub struct TestGateway {
    /// Lifecycle manager
    pub manager: Arc<ProviderManager>,
    /// Request log store
    pub logs: Arc<InMemoryRequestLogRepository>,
    /// Log pipeline feeding `logs`
    pub log_writer: Arc<AsyncLogWriter>,
    /// Metrics shared by every component
    pub metrics: Metrics,
}

impl TestGateway {
    /// Wire a gateway around `factories`
    pub fn new(factories: AdapterFactoryRegistry) -> Self {
        init_tracing();
        let metrics = Metrics::new(&MetricsConfig::default()).expect("metrics");
        let manager = Arc::new(ProviderManager::new(
            Arc::new(InMemoryProviderRepository::new()),
            factories,
            Arc::new(InstanceStore::new()),
        ));
        let logs = Arc::new(InMemoryRequestLogRepository::new());
        let log_writer = Arc::new(AsyncLogWriter::spawn(
            logs.clone(),
            64,
            Some(metrics.clone()),
        ));

        Self {
            manager,
            logs,
            log_writer,
            metrics,
        }
    }

    /// Relay over this gateway's store
    pub fn relay(&self) -> gateway_chat::ChatRelay {
        gateway_chat::ChatRelay::new(
            Arc::clone(self.manager.store()),
            Arc::clone(&self.log_writer),
        )
        .with_metrics(self.metrics.clone())
    }

    /// HTTP state over this gateway
    pub fn app_state(&self) -> AppState {
        AppState::builder()
            .manager(Arc::clone(&self.manager))
            .log_writer(Arc::clone(&self.log_writer))
            .metrics(self.metrics.clone())
            .build()
            .expect("state")
    }

    /// Wait until `count` logs are stored, then return them
    pub async fn logs_after(&self, count: usize) -> Vec<RequestLog> {
        for _ in 0..200 {
            if self.logs.len().await >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.logs.all().await
    }
}

/// Gateway HTTP server on an ephemeral port
pub struct TestServer {
    /// Base URL for the server
    pub base_url: String,
    /// HTTP client for making requests
    pub client: Client,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Serve `state` until dropped
    pub async fn start(state: AppState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get local addr");
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let server = Server::new(
            ServerConfig::new().with_shutdown_timeout(Duration::from_secs(1)),
            state,
        );
        tokio::spawn(server.run_with_listener(listener, async move {
            let _ = shutdown_rx.await;
        }));

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create client");

        Self {
            base_url: format!("http://{addr}"),
            client,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the full URL for a path
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Make a GET request
    pub async fn get(&self, path: &str) -> Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("Request failed")
    }

    /// Make a POST request with JSON body
    pub async fn post_json(&self, path: &str, body: &Value) -> Response {
        self.client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Request failed")
    }

    /// Make a PUT request with JSON body
    pub async fn put_json(&self, path: &str, body: &Value) -> Response {
        self.client
            .put(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Request failed")
    }

    /// POST a streaming request and collect the SSE `data:` payloads
    pub async fn post_streaming(&self, path: &str, body: &Value) -> Vec<String> {
        let text = self
            .post_json(path, body)
            .await
            .text()
            .await
            .expect("Failed to read stream");

        text.lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(str::to_string)
            .collect()
    }

    /// Shutdown the test server
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
