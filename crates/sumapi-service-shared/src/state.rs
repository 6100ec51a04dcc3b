//! Application state for the HTTP service.
//!
//! This module provides the shared state structure that axum handlers and the
//! middleware chain use to reach configuration, the metrics aggregation
//! service and the resource probe.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{ProxyNetwork, ServiceConfig};
use crate::health::{ResourceProbe, SystemProbe};
use crate::metrics::HttpMetrics;

/// Shared application state for all axum handlers.
///
/// This struct is cheaply cloneable (using `Arc` internally) and should be
/// shared via axum's `State` extractor.
///
/// # Example
///
/// ```ignore
/// use axum::{Router, routing::get, extract::State};
/// use sumapi_service_shared::{AppState, ServiceConfig};
///
/// async fn handler(State(state): State<AppState>) -> String {
///     state.config().server.environment.clone()
/// }
///
/// let state = AppState::new(ServiceConfig::from_env(), "0.1.0", None);
/// let app = Router::new()
///     .route("/env", get(handler))
///     .with_state(state);
/// ```
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ServiceConfig,
    version: String,
    started_at: Instant,
    metrics: Option<HttpMetrics>,
    probe: Arc<dyn ResourceProbe>,
    trusted_proxies: Arc<[ProxyNetwork]>,
}

impl AppState {
    /// Create state backed by the process resource probe.
    ///
    /// The uptime clock starts here.
    pub fn new(
        config: ServiceConfig,
        version: impl Into<String>,
        metrics: Option<HttpMetrics>,
    ) -> Self {
        Self::from_components(config, version, metrics, Arc::new(SystemProbe::new()))
    }

    /// Create state from explicit components.
    ///
    /// This is useful for testing with a fixed [`ResourceProbe`].
    pub fn from_components(
        config: ServiceConfig,
        version: impl Into<String>,
        metrics: Option<HttpMetrics>,
        probe: Arc<dyn ResourceProbe>,
    ) -> Self {
        let trusted_proxies = config.security.networks().into();
        Self {
            inner: Arc::new(AppStateInner {
                config,
                version: version.into(),
                started_at: Instant::now(),
                metrics,
                probe,
                trusted_proxies,
            }),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    /// Service version reported by health and metadata endpoints.
    pub fn version(&self) -> &str {
        &self.inner.version
    }

    /// Time since the state was created.
    pub fn uptime(&self) -> Duration {
        self.inner.started_at.elapsed()
    }

    /// The metrics aggregation service, when metrics are enabled.
    pub fn metrics(&self) -> Option<&HttpMetrics> {
        self.inner.metrics.as_ref()
    }

    pub fn probe(&self) -> &dyn ResourceProbe {
        self.inner.probe.as_ref()
    }

    /// Parsed trusted proxy networks.
    pub fn trusted_proxies(&self) -> Arc<[ProxyNetwork]> {
        self.inner.trusted_proxies.clone()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("version", &self.inner.version)
            .field("environment", &self.inner.config.server.environment)
            .field("metrics_enabled", &self.inner.metrics.is_some())
            .field("trusted_proxies", &self.inner.trusted_proxies.len())
            .finish()
    }
}
