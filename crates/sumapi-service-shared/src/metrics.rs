//! Prometheus metrics infrastructure for the sum API service.
//!
//! This module provides:
//! - [`MetricsConfig`]: Configuration for the metrics system
//! - [`HttpMetrics`]: The process-wide aggregation service
//! - [`init_metrics`]: Build the aggregation service at startup
//! - [`metrics_handler`]: Axum handler for the metrics endpoint
//!
//! The Prometheus recorder is owned by [`HttpMetrics`] rather than installed
//! as the global `metrics` recorder. Every recording site runs the `metrics`
//! macros inside [`HttpMetrics::record`], which scopes them to this recorder.
//! Counters, gauges and histograms are backed by atomic storage, so the
//! service can be cloned into every request task.
//!
//! # Example
//!
//! ```no_run
//! use sumapi_service_shared::metrics::{MetricsConfig, init_metrics};
//!
//! let config = MetricsConfig::default();
//! let metrics = init_metrics(&config, "1.0.0", "development")
//!     .expect("failed to initialize metrics");
//! print!("{}", metrics.render());
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use metrics_exporter_prometheus::{
    Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder,
};
use serde::{Deserialize, Serialize};

use crate::config::{bool_var, string_var, Lookup};
use crate::AppState;

/// Prometheus default latency buckets, in seconds.
pub const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Exponential size buckets in bytes (100 × 10^k for k in 0..5).
pub const SIZE_BUCKETS: &[f64] = &[100.0, 1_000.0, 10_000.0, 100_000.0, 1_000_000.0];

/// Content type of the Prometheus text exposition format.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Configuration for the metrics system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled.
    pub enabled: bool,
    /// Path for the metrics endpoint (e.g., "/metrics").
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/metrics".to_string(),
        }
    }
}

impl MetricsConfig {
    /// Create configuration from environment variables.
    ///
    /// - `METRICS_ENABLED`: boolean flag (default: true)
    /// - `METRICS_PATH`: Path for metrics endpoint (default: "/metrics")
    pub fn from_env() -> Self {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Self {
        let defaults = Self::default();
        Self {
            enabled: bool_var(lookup, "METRICS_ENABLED", defaults.enabled),
            path: string_var(lookup, "METRICS_PATH", defaults.path),
        }
    }
}

/// Labels attached to a completed HTTP request.
#[derive(Debug, Clone)]
pub struct RequestLabels {
    pub method: String,
    /// Matched route pattern, or `unmatched`.
    pub route: String,
    pub status: u16,
}

/// Process-scoped metrics aggregation service.
///
/// Cheap to clone; all clones record into the same recorder.
#[derive(Clone)]
pub struct HttpMetrics {
    inner: Arc<HttpMetricsInner>,
}

struct HttpMetricsInner {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl std::fmt::Debug for HttpMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpMetrics").finish_non_exhaustive()
    }
}

impl HttpMetrics {
    /// Build a new recorder with the service's histogram buckets.
    pub fn new() -> Result<Self, MetricsError> {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full("http_request_duration_seconds".to_string()),
                DURATION_BUCKETS,
            )
            .and_then(|b| {
                let sizes = Matcher::Suffix("_size_bytes".to_string());
                b.set_buckets_for_metric(sizes, SIZE_BUCKETS)
            })
            .map_err(|e| MetricsError::BuildFailed(e.to_string()))?
            .build_recorder();
        let handle = recorder.handle();

        Ok(Self {
            inner: Arc::new(HttpMetricsInner { recorder, handle }),
        })
    }

    /// Run `f` with this service's recorder as the active `metrics` recorder.
    pub fn record<T>(&self, f: impl FnOnce() -> T) -> T {
        metrics::with_local_recorder(&self.inner.recorder, f)
    }

    /// Render all metrics in Prometheus exposition format.
    pub fn render(&self) -> String {
        self.inner.handle.render()
    }

    /// Publish the `app_info` gauge.
    pub fn set_app_info(&self, version: &str, environment: &str) {
        self.record(|| {
            metrics::gauge!(
                "app_info",
                "version" => version.to_string(),
                "environment" => environment.to_string()
            )
            .set(1.0);
        });
    }

    pub fn request_started(&self) {
        self.record(|| metrics::gauge!("http_requests_in_flight").increment(1.0));
    }

    pub fn request_ended(&self) {
        self.record(|| metrics::gauge!("http_requests_in_flight").decrement(1.0));
    }

    /// Record the counters and histograms for a completed request.
    pub fn request_completed(
        &self,
        labels: &RequestLabels,
        duration: Duration,
        request_size: u64,
        response_size: Option<u64>,
    ) {
        let status = labels.status.to_string();
        self.record(|| {
            metrics::counter!(
                "http_requests_total",
                "method" => labels.method.clone(),
                "route" => labels.route.clone(),
                "status_code" => status.clone()
            )
            .increment(1);

            metrics::histogram!(
                "http_request_duration_seconds",
                "method" => labels.method.clone(),
                "route" => labels.route.clone(),
                "status_code" => status.clone()
            )
            .record(duration.as_secs_f64());

            metrics::histogram!(
                "http_request_size_bytes",
                "method" => labels.method.clone(),
                "route" => labels.route.clone()
            )
            .record(request_size as f64);

            if let Some(size) = response_size.filter(|s| *s > 0) {
                metrics::histogram!(
                    "http_response_size_bytes",
                    "method" => labels.method.clone(),
                    "route" => labels.route.clone(),
                    "status_code" => status.clone()
                )
                .record(size as f64);
            }
        });
    }

    /// Count a sum request by outcome (`ok`, `invalid_request_body`, `validation_error`).
    pub fn record_sum_outcome(&self, outcome: &'static str) {
        self.record(|| {
            let counter = metrics::counter!("sum_requests_total", "outcome" => outcome);
            counter.increment(1);
        });
    }

    /// Record the number of inputs of an accepted sum request.
    pub fn record_sum_numbers(&self, count: usize) {
        self.record(|| {
            let histogram = metrics::histogram!("sum_numbers_count");
            histogram.record(count as f64);
        });
    }
}

/// Build the metrics aggregation service and publish `app_info`.
///
/// # Errors
///
/// Returns [`MetricsError::Disabled`] when metrics are turned off, or
/// [`MetricsError::BuildFailed`] if the recorder cannot be configured.
pub fn init_metrics(
    config: &MetricsConfig,
    version: &str,
    environment: &str,
) -> Result<HttpMetrics, MetricsError> {
    if !config.enabled {
        return Err(MetricsError::Disabled);
    }

    let metrics = HttpMetrics::new()?;
    metrics.set_app_info(version, environment);
    Ok(metrics)
}

/// Axum handler for the metrics endpoint.
///
/// Returns Prometheus exposition format text.
pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    let body = state
        .metrics()
        .map(HttpMetrics::render)
        .unwrap_or_else(|| "# Metrics not initialized\n".to_string());

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        body,
    )
        .into_response()
}

/// Errors that can occur during metrics initialization.
#[derive(Debug, Clone)]
pub enum MetricsError {
    /// Metrics are disabled in configuration.
    Disabled,
    /// The Prometheus recorder could not be built.
    BuildFailed(String),
}

impl std::fmt::Display for MetricsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricsError::Disabled => write!(f, "metrics are disabled"),
            MetricsError::BuildFailed(e) => write!(f, "failed to build metrics recorder: {}", e),
        }
    }
}

impl std::error::Error for MetricsError {}
