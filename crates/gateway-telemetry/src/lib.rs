//! # Gateway Telemetry
//!
//! Observability for the LLM Provider Gateway.
//!
//! This crate provides:
//! - Structured logging setup
//! - Prometheus metrics for chat traffic and the log pipeline
//! - The asynchronous request log writer

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod log_writer;
pub mod logging;
pub mod metrics;

// Re-export main types
pub use log_writer::{AsyncLogWriter, LogWriterStats, DEFAULT_QUEUE_CAPACITY};
pub use logging::{init_logging, LogFormat, LoggingConfig, TracingError};
pub use metrics::{Metrics, MetricsConfig};
