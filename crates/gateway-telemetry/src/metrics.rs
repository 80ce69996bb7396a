//! Prometheus metrics for the gateway.
//!
//! Every metric lives in a private [`Registry`] owned by [`Metrics`], so
//! several gateways (or tests) in one process never collide.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Default latency buckets in seconds; streams can run for minutes
pub const DEFAULT_LATENCY_BUCKETS: &[f64] = &[
    0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
];

/// Metrics configuration
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Histogram buckets for chat latency
    pub latency_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            latency_buckets: DEFAULT_LATENCY_BUCKETS.to_vec(),
        }
    }
}

impl MetricsConfig {
    /// Override the latency buckets
    #[must_use]
    pub fn with_latency_buckets(mut self, buckets: Vec<f64>) -> Self {
        self.latency_buckets = buckets;
        self
    }
}

/// Gateway metric handles
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    chat_requests: IntCounterVec,
    chat_latency: HistogramVec,
    logs_written: IntCounter,
    log_write_failures: IntCounter,
    logs_dropped: IntCounter,
    live_providers: IntGauge,
}

impl Metrics {
    /// Create and register all metrics
    ///
    /// # Errors
    /// Returns error if a metric descriptor is invalid
    pub fn new(config: &MetricsConfig) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let chat_requests = IntCounterVec::new(
            Opts::new("gateway_chat_requests_total", "Chat exchanges by outcome"),
            &["provider", "status", "mode"],
        )?;
        let chat_latency = HistogramVec::new(
            HistogramOpts::new("gateway_chat_latency_seconds", "Chat exchange duration")
                .buckets(config.latency_buckets.clone()),
            &["provider", "mode"],
        )?;
        let logs_written = IntCounter::with_opts(Opts::new(
            "gateway_request_logs_written_total",
            "Request logs persisted",
        ))?;
        let log_write_failures = IntCounter::with_opts(Opts::new(
            "gateway_request_log_write_failures_total",
            "Request logs the store rejected",
        ))?;
        let logs_dropped = IntCounter::with_opts(Opts::new(
            "gateway_request_log_dropped_total",
            "Request logs dropped because the queue was full or closed",
        ))?;
        let live_providers = IntGauge::with_opts(Opts::new(
            "gateway_live_providers",
            "Adapters currently serving traffic",
        ))?;

        registry.register(Box::new(chat_requests.clone()))?;
        registry.register(Box::new(chat_latency.clone()))?;
        registry.register(Box::new(logs_written.clone()))?;
        registry.register(Box::new(log_write_failures.clone()))?;
        registry.register(Box::new(logs_dropped.clone()))?;
        registry.register(Box::new(live_providers.clone()))?;

        Ok(Self {
            registry,
            chat_requests,
            chat_latency,
            logs_written,
            log_write_failures,
            logs_dropped,
            live_providers,
        })
    }

    /// Record one finished chat exchange
    pub fn record_chat(&self, provider: &str, mode: &str, status: &str, latency: Duration) {
        self.chat_requests
            .with_label_values(&[provider, status, mode])
            .inc();
        self.chat_latency
            .with_label_values(&[provider, mode])
            .observe(latency.as_secs_f64());
    }

    /// Count a persisted request log
    pub fn log_written(&self) {
        self.logs_written.inc();
    }

    /// Count a request log the store rejected
    pub fn log_write_failed(&self) {
        self.log_write_failures.inc();
    }

    /// Count a request log shed at submission
    pub fn log_dropped(&self) {
        self.logs_dropped.inc();
    }

    /// Set the live adapter gauge
    pub fn set_live_providers(&self, count: usize) {
        self.live_providers.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Underlying registry
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text format
    ///
    /// # Errors
    /// Returns error if encoding fails
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_all_families() {
        let metrics = Metrics::new(&MetricsConfig::default()).expect("metrics");
        metrics.record_chat("p1", "stream", "success", Duration::from_millis(120));
        metrics.log_written();
        metrics.log_dropped();
        metrics.log_write_failed();
        metrics.set_live_providers(3);

        let text = metrics.render().expect("render");
        assert!(text.contains(
            "gateway_chat_requests_total{mode=\"stream\",provider=\"p1\",status=\"success\"} 1"
        ));
        assert!(text.contains("gateway_chat_latency_seconds_bucket"));
        assert!(text.contains("gateway_request_logs_written_total 1"));
        assert!(text.contains("gateway_request_log_dropped_total 1"));
        assert!(text.contains("gateway_request_log_write_failures_total 1"));
        assert!(text.contains("gateway_live_providers 3"));
    }

    #[test]
    fn test_independent_registries() {
        let a = Metrics::new(&MetricsConfig::default()).expect("a");
        let b = Metrics::new(&MetricsConfig::default()).expect("b");
        a.log_dropped();
        assert!(b.render().expect("render").contains("gateway_request_log_dropped_total 0"));
    }

    #[test]
    fn test_custom_buckets() {
        let config = MetricsConfig::default().with_latency_buckets(vec![1.0, 2.0]);
        let metrics = Metrics::new(&config).expect("metrics");
        metrics.record_chat("p1", "buffered", "error", Duration::from_secs(1));
        let text = metrics.render().expect("render");
        assert!(text.contains("le=\"2\""));
        assert!(!text.contains("le=\"0.05\""));
    }
}
