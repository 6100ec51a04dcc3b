//! Health check handlers for Kubernetes probes.
//!
//! Provides the full health endpoint plus `/live` and `/ready` probes. Every
//! handler answers with a [`HealthResponse`] JSON body; the full and readiness
//! probes switch to 503 when any check reports something other than `ok`.
//!
//! Resource sampling sits behind [`ResourceProbe`] so that tests can inject
//! fixed readings.

use std::sync::Mutex;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sumapi_lib::{
    check_memory, check_tasks, check_uptime, format_uptime, CheckOutcomes, HealthResponse,
    CHECK_OK,
};
use sysinfo::{Pid, System};

use crate::middleware::RequestId;
use crate::AppState;

/// Source of process resource readings for the full health check.
pub trait ResourceProbe: Send + Sync + 'static {
    /// Resident memory of this process in bytes, if it can be sampled.
    fn resident_memory_bytes(&self) -> Option<u64>;

    /// Number of tasks currently alive on the async runtime.
    fn alive_tasks(&self) -> usize;
}

/// Production probe: process RSS from the OS, task count from tokio.
pub struct SystemProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SystemProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SystemProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemProbe")
            .field("pid", &self.pid)
            .finish()
    }
}

impl ResourceProbe for SystemProbe {
    fn resident_memory_bytes(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock().ok()?;
        if !system.refresh_process(pid) {
            return None;
        }
        system.process(pid).map(|process| process.memory())
    }

    fn alive_tasks(&self) -> usize {
        tokio::runtime::Handle::try_current()
            .map(|handle| handle.metrics().num_alive_tasks())
            .unwrap_or(0)
    }
}

fn respond(response: HealthResponse) -> Response {
    let status = if response.is_passing() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response)).into_response()
}

/// Full health handler.
///
/// Checks resident memory, alive task count and uptime against the configured
/// thresholds.
///
/// # Example
///
/// ```text
/// GET /healthz
/// {"status":"healthy","timestamp":"...","version":"0.1.0","uptime":"12s 40ms",
///  "checks":{"memory":"ok","tasks":"ok","uptime":"ok"},"request_id":"..."}
/// ```
pub async fn health_full(State(state): State<AppState>, request_id: RequestId) -> Response {
    let thresholds = &state.config().health.thresholds;
    let probe = state.probe();
    let uptime = state.uptime();

    let resident = probe.resident_memory_bytes();
    if resident.is_none() {
        tracing::debug!(
            request_id = %request_id,
            "resident memory unavailable, memory check skipped"
        );
    }

    let memory = check_memory(resident, thresholds.max_memory_bytes);
    let tasks = check_tasks(probe.alive_tasks(), thresholds.max_tasks);
    let checks = CheckOutcomes::new()
        .with("memory", memory)
        .with("tasks", tasks)
        .with("uptime", check_uptime(uptime, thresholds.min_uptime));

    let response = HealthResponse::full(
        state.version(),
        format_uptime(uptime),
        checks,
        request_id.as_str(),
    );

    tracing::info!(
        status = %response.status,
        uptime = response.uptime.as_deref().unwrap_or(""),
        failing = ?response.checks.as_ref().map(|c| c.failing()).unwrap_or_default(),
        request_id = %request_id,
        component = "health_check",
        "Health check performed"
    );

    respond(response)
}

/// Liveness probe handler.
///
/// Returns 200 OK whenever the process can serve a request.
pub async fn health_live(request_id: RequestId) -> Response {
    tracing::info!(
        request_id = %request_id,
        component = "health_check",
        "Liveness check performed"
    );
    respond(HealthResponse::alive(request_id.as_str()))
}

/// Readiness probe handler.
///
/// Ready when the loaded configuration validates.
pub async fn health_ready(State(state): State<AppState>, request_id: RequestId) -> Response {
    let configuration = match state.config().validate() {
        Ok(()) => CHECK_OK.to_string(),
        Err(e) => {
            tracing::warn!(error = %e, request_id = %request_id, "configuration invalid");
            "invalid_configuration".to_string()
        }
    };
    let checks = CheckOutcomes::new()
        .with("service", CHECK_OK)
        .with("configuration", configuration);

    let response = HealthResponse::readiness(checks, request_id.as_str());

    tracing::info!(
        status = %response.status,
        request_id = %request_id,
        component = "health_check",
        "Readiness check performed"
    );

    respond(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::test_utils::{test_state, test_state_with, StaticProbe};
    use axum::http::{HeaderName, HeaderValue};
    use axum::{routing::get, Router};
    use axum_test::TestServer;
    use sumapi_lib::HealthStatus;

    fn server(state: AppState) -> TestServer {
        let app = Router::new()
            .route("/healthz", get(health_full))
            .route("/healthz/live", get(health_live))
            .route("/healthz/ready", get(health_ready))
            .with_state(state);
        TestServer::new(app).unwrap()
    }

    #[tokio::test]
    async fn test_health_full_healthy() {
        let response = server(test_state()).get("/healthz").await;
        response.assert_status_ok();

        let body: HealthResponse = response.json();
        assert_eq!(body.status, HealthStatus::Healthy);
        assert_eq!(body.version.as_deref(), Some("test"));
        assert!(body.uptime.is_some());
        let checks = body.checks.unwrap();
        assert_eq!(checks.get("memory"), Some("ok"));
        assert_eq!(checks.get("tasks"), Some("ok"));
        assert_eq!(checks.get("uptime"), Some("ok"));
    }

    #[tokio::test]
    async fn test_health_full_unhealthy_memory() {
        let probe = StaticProbe::new(Some(2 * 1024 * 1024 * 1024), 3);
        let state = test_state_with(ServiceConfig::default(), probe);
        let response = server(state).get("/healthz").await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);

        let body: HealthResponse = response.json();
        assert_eq!(body.status, HealthStatus::Unhealthy);
        assert_eq!(
            body.checks.unwrap().get("memory"),
            Some("high_memory_usage")
        );
    }

    #[tokio::test]
    async fn test_health_full_unhealthy_tasks() {
        let probe = StaticProbe::new(Some(1024), 1500);
        let state = test_state_with(ServiceConfig::default(), probe);
        let response = server(state).get("/healthz").await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);

        let body: HealthResponse = response.json();
        assert_eq!(
            body.checks.unwrap().get("tasks"),
            Some("high_task_count_1500")
        );
    }

    #[tokio::test]
    async fn test_health_full_memory_unavailable_is_ok() {
        let probe = StaticProbe::new(None, 1);
        let state = test_state_with(ServiceConfig::default(), probe);
        let response = server(state).get("/healthz").await;
        response.assert_status_ok();
    }

    #[tokio::test]
    async fn test_health_live() {
        let response = server(test_state()).get("/healthz/live").await;
        response.assert_status_ok();

        let body: HealthResponse = response.json();
        assert_eq!(body.status, HealthStatus::Alive);
        assert!(body.checks.is_none());
        assert!(!body.request_id.is_empty());
    }

    #[tokio::test]
    async fn test_health_ready() {
        let response = server(test_state()).get("/healthz/ready").await;
        response.assert_status_ok();

        let body: HealthResponse = response.json();
        assert_eq!(body.status, HealthStatus::Ready);
        let checks = body.checks.unwrap();
        assert_eq!(checks.get("service"), Some("ok"));
        assert_eq!(checks.get("configuration"), Some("ok"));
    }

    #[tokio::test]
    async fn test_health_ready_invalid_configuration() {
        let mut config = ServiceConfig::default();
        config.metrics.path = config.health.path.clone();
        let state = test_state_with(config, StaticProbe::default());

        let response = server(state).get("/healthz/ready").await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);

        let body: HealthResponse = response.json();
        assert_eq!(body.status, HealthStatus::NotReady);
        assert_eq!(
            body.checks.unwrap().get("configuration"),
            Some("invalid_configuration")
        );
    }

    #[tokio::test]
    async fn test_health_uses_inbound_request_id() {
        let response = server(test_state())
            .get("/healthz/live")
            .add_header(
                HeaderName::from_static("x-request-id"),
                HeaderValue::from_static("probe-1"),
            )
            .await;
        let body: HealthResponse = response.json();
        assert_eq!(body.request_id, "probe-1");
    }

    #[tokio::test]
    async fn test_system_probe_reads_runtime() {
        let probe = SystemProbe::new();
        assert!(probe.alive_tasks() < 1000);
        if let Some(bytes) = probe.resident_memory_bytes() {
            assert!(bytes > 0);
        }
    }
}
