//! Asynchronous request log writer.
//!
//! A bounded queue drained by one background task. Submission never waits:
//! when the queue is full the record is dropped and reported through
//! `tracing` and the drop counter. The consumer writes records one at a
//! time in submission order, and a failed write never stops it.
//!
//! Producers share the queue sender without locking. Shutdown is signalled
//! through a [`CancellationToken`]; the consumer then closes the queue and
//! drains what was already accepted.

use crate::metrics::Metrics;
use gateway_core::{RequestLog, RequestLogRepository};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Point-in-time writer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LogWriterStats {
    /// Records accepted into the queue
    pub submitted: u64,
    /// Records shed at submission
    pub dropped: u64,
    /// Records persisted
    pub written: u64,
    /// Records the store rejected
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    dropped: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
}

/// Background writer for [`RequestLog`] records
pub struct AsyncLogWriter {
    sender: mpsc::Sender<RequestLog>,
    closed: CancellationToken,
    consumer: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
    metrics: Option<Metrics>,
    capacity: usize,
}

impl AsyncLogWriter {
    /// Start the consumer task on the current runtime
    ///
    /// A capacity of zero is raised to one.
    pub fn spawn(
        repository: Arc<dyn RequestLogRepository>,
        capacity: usize,
        metrics: Option<Metrics>,
    ) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let counters = Arc::new(Counters::default());
        let closed = CancellationToken::new();

        let consumer = tokio::spawn(consume(
            receiver,
            repository,
            Arc::clone(&counters),
            metrics.clone(),
            closed.clone(),
        ));

        info!(capacity, "Request log writer started");

        Self {
            sender,
            closed,
            consumer: Mutex::new(Some(consumer)),
            counters,
            metrics,
            capacity,
        }
    }

    /// Enqueue a record without waiting
    ///
    /// Returns whether the record was accepted. A full or closed queue drops
    /// the record; the caller is never blocked or failed.
    pub fn submit(&self, record: RequestLog) -> bool {
        let result = if self.closed.is_cancelled() {
            Err(TrySendError::Closed(record))
        } else {
            self.sender.try_send(record)
        };

        match result {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(err) => {
                let (reason, record) = match err {
                    TrySendError::Full(record) => ("queue full", record),
                    TrySendError::Closed(record) => ("writer closed", record),
                };
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.log_dropped();
                }
                warn!(
                    reason,
                    model = %record.model_name,
                    caller = %record.caller,
                    status = record.status.as_str(),
                    "Request log dropped"
                );
                false
            }
        }
    }

    /// Close the queue and wait for already accepted records to be written
    ///
    /// Later submissions are dropped. Calling this more than once is a no-op.
    pub async fn shutdown(&self) {
        self.closed.cancel();
        let consumer = self.consumer.lock().take();

        if let Some(consumer) = consumer {
            if let Err(e) = consumer.await {
                error!(error = %e, "Request log writer task failed");
            }
            let stats = self.stats();
            info!(
                written = stats.written,
                failed = stats.failed,
                dropped = stats.dropped,
                "Request log writer stopped"
            );
        }
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> LogWriterStats {
        LogWriterStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            written: self.counters.written.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Queue capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for AsyncLogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncLogWriter")
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

async fn consume(
    mut receiver: mpsc::Receiver<RequestLog>,
    repository: Arc<dyn RequestLogRepository>,
    counters: Arc<Counters>,
    metrics: Option<Metrics>,
    closed: CancellationToken,
) {
    loop {
        let record = tokio::select! {
            biased;
            record = receiver.recv() => record,
            () = closed.cancelled() => {
                receiver.close();
                receiver.recv().await
            }
        };
        let Some(record) = record else {
            break;
        };

        let model = record.model_name.clone();
        let status = record.status;

        match repository.create(record).await {
            Ok(saved) => {
                counters.written.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &metrics {
                    metrics.log_written();
                }
                debug!(id = ?saved.id, model = %model, status = status.as_str(), "Request log written");
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &metrics {
                    metrics.log_write_failed();
                }
                error!(error = %e, model = %model, status = status.as_str(), "Failed to write request log");
            }
        }
    }
}
