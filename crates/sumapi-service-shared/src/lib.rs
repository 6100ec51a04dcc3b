//! Shared infrastructure for the sum API HTTP service.
//!
//! This crate provides the HTTP glue around `sumapi-lib`:
//!
//! - [`ServiceConfig`]: Environment-driven configuration with validation
//! - [`AppState`]: Configuration, metrics service and resource probe shared by handlers
//! - [`health`]: Health, liveness and readiness handlers
//! - [`ErrorResponse`]: Uniform JSON error payload
//! - [`metrics`]: Prometheus metrics aggregation service
//! - [`logging`]: Structured JSON logging setup
//! - [`middleware`]: Request ID, access logging and metrics middleware
//! - [`recovery`]: Panic boundary that turns faults into 500 responses
//!
//! # Architecture
//!
//! Handlers stay thin; decoding, validation and arithmetic live in
//! `sumapi-lib`:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  RecoveryLayer        panic -> 500 INTERNAL_SERVER_ERROR    │
//! │  RequestLogLayer      X-Request-ID, access log              │
//! │  MetricsLayer         in-flight gauge, counters, histograms │
//! │  axum Handler         decode, validate, call sumapi-lib     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Testing Support
//!
//! The [`test_utils`] module provides test fixtures and fixed resource probes
//! for handler testing. Enable the `test-utils` feature to access it from
//! dependent crates.

#![deny(warnings)]

pub mod config;
mod error_response;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod recovery;
mod state;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{
    ConfigError, HealthConfig, ProxyNetwork, SecurityConfig, ServerConfig, ServiceConfig,
};
pub use error_response::{from_lib_error, ErrorCode, ErrorResponse, INTERNAL_ERROR_MESSAGE};
pub use health::{health_full, health_live, health_ready, ResourceProbe, SystemProbe};
pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use metrics::{init_metrics, metrics_handler, HttpMetrics, MetricsConfig, MetricsError};
pub use middleware::{
    extract_or_generate_request_id, with_middleware, MetricsLayer, RequestId, RequestLogLayer,
    REQUEST_ID_HEADER,
};
pub use recovery::RecoveryLayer;
pub use state::AppState;
