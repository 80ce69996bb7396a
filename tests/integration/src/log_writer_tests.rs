//! Request log pipeline tests under a slow store

use async_trait::async_trait;
use gateway_core::{
    CallerId, ChatMessage, GatewayError, GatewayResult, RequestLog, RequestLogRepository,
};
use gateway_storage::InMemoryRequestLogRepository;
use gateway_telemetry::{AsyncLogWriter, Metrics, MetricsConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, Semaphore};

/// Store whose writes wait for the test to open the gate
struct GatedRepository {
    inner: InMemoryRequestLogRepository,
    entered: Notify,
    gate: Semaphore,
}

impl GatedRepository {
    fn new() -> Self {
        Self {
            inner: InMemoryRequestLogRepository::new(),
            entered: Notify::new(),
            gate: Semaphore::new(0),
        }
    }

    fn open(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl RequestLogRepository for GatedRepository {
    async fn create(&self, log: RequestLog) -> GatewayResult<RequestLog> {
        self.entered.notify_one();
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| GatewayError::internal(e.to_string()))?;
        self.inner.create(log).await
    }

    async fn list_recent(&self, limit: usize) -> GatewayResult<Vec<RequestLog>> {
        self.inner.list_recent(limit).await
    }
}

fn record(model: &str) -> RequestLog {
    RequestLog::new(CallerId::new("burst"), model, &[ChatMessage::user("hi")]).success()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_saturated_queue_drops_burst_overflow() {
    const CAPACITY: usize = 8;

    let repo = Arc::new(GatedRepository::new());
    let metrics = Metrics::new(&MetricsConfig::default()).expect("metrics");
    let writer = AsyncLogWriter::spawn(repo.clone(), CAPACITY, Some(metrics.clone()));

    // Park the consumer inside a write so the queue cannot drain.
    assert!(writer.submit(record("warmup")));
    repo.entered.notified().await;

    let started = Instant::now();
    let accepted = (0..=CAPACITY)
        .filter(|i| writer.submit(record(&format!("burst-{i}"))))
        .count();
    assert!(started.elapsed() < Duration::from_millis(100), "submit blocked");
    assert_eq!(accepted, CAPACITY);
    assert_eq!(writer.stats().dropped, 1);

    repo.open();
    writer.shutdown().await;

    let stored = repo.inner.all().await;
    let burst = stored
        .iter()
        .filter(|log| log.model_name.starts_with("burst-"))
        .count();
    assert!(burst <= CAPACITY);
    assert_eq!(stored.len(), CAPACITY + 1);
    assert!(metrics
        .render()
        .expect("render")
        .contains("gateway_request_log_dropped_total 1"));
}

#[tokio::test]
async fn test_shutdown_drains_accepted_records() {
    let repo = Arc::new(InMemoryRequestLogRepository::new());
    let writer = AsyncLogWriter::spawn(repo.clone(), 32, None);

    for i in 0..20 {
        assert!(writer.submit(record(&format!("m{i}"))));
    }
    writer.shutdown().await;

    assert_eq!(repo.len().await, 20);
    assert!(!writer.submit(record("late")));
    assert_eq!(writer.stats().written, 20);
}
