//! Health check evaluation and response aggregation.
//!
//! Each check reduces to an outcome string: [`CHECK_OK`] when the check
//! passes, otherwise a short failure code such as `high_memory_usage` or
//! `starting`. A probe's aggregate status is positive only when every outcome
//! is exactly [`CHECK_OK`].

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome reported by a passing check.
pub const CHECK_OK: &str = "ok";

/// Status reported by the liveness, readiness and full health probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Alive,
    Ready,
    NotReady,
}

impl HealthStatus {
    /// Whether the status should be served with a success code.
    pub fn is_passing(self) -> bool {
        matches!(
            self,
            HealthStatus::Healthy | HealthStatus::Alive | HealthStatus::Ready
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Alive => "alive",
            HealthStatus::Ready => "ready",
            HealthStatus::NotReady => "not_ready",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named check outcomes, ordered by name for stable output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckOutcomes(BTreeMap<String, String>);

impl CheckOutcomes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of a named check, replacing any earlier outcome.
    pub fn insert(&mut self, name: impl Into<String>, outcome: impl Into<String>) {
        self.0.insert(name.into(), outcome.into());
    }

    /// Add an outcome, builder style.
    pub fn with(mut self, name: impl Into<String>, outcome: impl Into<String>) -> Self {
        self.insert(name, outcome);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// True when every recorded outcome is exactly [`CHECK_OK`].
    pub fn all_ok(&self) -> bool {
        self.0.values().all(|outcome| outcome == CHECK_OK)
    }

    /// Names of the checks that did not pass.
    pub fn failing(&self) -> Vec<&str> {
        self.0
            .iter()
            .filter(|(_, outcome)| outcome.as_str() != CHECK_OK)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CheckOutcomes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Health probe response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checks: Option<CheckOutcomes>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
}

impl HealthResponse {
    fn bare(status: HealthStatus, request_id: impl Into<String>) -> Self {
        Self {
            status,
            timestamp: Utc::now(),
            version: None,
            uptime: None,
            checks: None,
            request_id: request_id.into(),
        }
    }

    /// Liveness response; carries no checks.
    pub fn alive(request_id: impl Into<String>) -> Self {
        Self::bare(HealthStatus::Alive, request_id)
    }

    /// Readiness response: `ready` when all checks pass, else `not_ready`.
    pub fn readiness(checks: CheckOutcomes, request_id: impl Into<String>) -> Self {
        let status = if checks.all_ok() {
            HealthStatus::Ready
        } else {
            HealthStatus::NotReady
        };
        Self {
            checks: Some(checks),
            ..Self::bare(status, request_id)
        }
    }

    /// Full health response: `healthy` when all checks pass, else `unhealthy`.
    pub fn full(
        version: impl Into<String>,
        uptime: impl Into<String>,
        checks: CheckOutcomes,
        request_id: impl Into<String>,
    ) -> Self {
        let status = if checks.all_ok() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        Self {
            version: Some(version.into()),
            uptime: Some(uptime.into()),
            checks: Some(checks),
            ..Self::bare(status, request_id)
        }
    }

    pub fn is_passing(&self) -> bool {
        self.status.is_passing()
    }
}

/// Limits applied by the full health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthThresholds {
    /// Resident memory ceiling in bytes.
    pub max_memory_bytes: u64,
    /// Ceiling on concurrently alive runtime tasks.
    pub max_tasks: usize,
    /// Uptime below which the service still reports `starting`.
    pub min_uptime: Duration,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            max_memory_bytes: 1024 * 1024 * 1024,
            max_tasks: 1000,
            min_uptime: Duration::from_micros(1),
        }
    }
}

/// Memory check. `None` means the sample was unavailable and is not held
/// against the service.
pub fn check_memory(resident_bytes: Option<u64>, limit: u64) -> String {
    match resident_bytes {
        Some(bytes) if bytes > limit => "high_memory_usage".to_string(),
        _ => CHECK_OK.to_string(),
    }
}

/// Task count check; the failure code embeds the observed count.
pub fn check_tasks(alive: usize, limit: usize) -> String {
    if alive > limit {
        format!("high_task_count_{}", alive)
    } else {
        CHECK_OK.to_string()
    }
}

pub fn check_uptime(uptime: Duration, minimum: Duration) -> String {
    if uptime < minimum {
        "starting".to_string()
    } else {
        CHECK_OK.to_string()
    }
}

/// Render an uptime as a human-readable duration, truncated to milliseconds.
pub fn format_uptime(uptime: Duration) -> String {
    let millis = Duration::from_millis(uptime.as_millis() as u64);
    humantime::format_duration(millis).to_string()
}
