//! Test utilities for service handler testing.
//!
//! This module provides fixtures and helpers for testing HTTP handlers with a
//! default configuration, a private metrics recorder and fixed resource
//! readings.

use std::sync::Arc;

use crate::config::ServiceConfig;
use crate::health::ResourceProbe;
use crate::metrics::HttpMetrics;
use crate::state::AppState;

/// Version string reported by test states.
pub const TEST_VERSION: &str = "test";

/// Probe that reports fixed readings.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe {
    pub memory_bytes: Option<u64>,
    pub tasks: usize,
}

impl StaticProbe {
    pub fn new(memory_bytes: Option<u64>, tasks: usize) -> Self {
        Self {
            memory_bytes,
            tasks,
        }
    }
}

impl Default for StaticProbe {
    /// 64 MiB resident, four tasks.
    fn default() -> Self {
        Self::new(Some(64 * 1024 * 1024), 4)
    }
}

impl ResourceProbe for StaticProbe {
    fn resident_memory_bytes(&self) -> Option<u64> {
        self.memory_bytes
    }

    fn alive_tasks(&self) -> usize {
        self.tasks
    }
}

/// Build a fresh test state with default configuration.
///
/// Each call gets its own metrics recorder, so assertions on rendered metrics
/// are not affected by other tests.
///
/// # Panics
///
/// Panics if the metrics recorder cannot be built.
pub fn test_state() -> AppState {
    test_state_with(ServiceConfig::default(), StaticProbe::default())
}

/// Build a test state from a configuration and a fixed probe.
///
/// Metrics are attached when `config.metrics.enabled` is set.
pub fn test_state_with(config: ServiceConfig, probe: StaticProbe) -> AppState {
    let metrics = config.metrics.enabled.then(|| {
        HttpMetrics::new().unwrap_or_else(|e| panic!("failed to build test metrics: {}", e))
    });
    AppState::from_components(config, TEST_VERSION, metrics, Arc::new(probe))
}

/// Generate a unique request ID for testing.
pub fn test_request_id() -> String {
    format!("test-{}", uuid::Uuid::now_v7())
}
