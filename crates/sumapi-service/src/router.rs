//! Route table and middleware composition.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::timeout::TimeoutLayer;
use tracing::warn;

use sumapi_service_shared::{
    AppState, HealthConfig, health_full, health_live, health_ready, metrics_handler,
    with_middleware,
};

use crate::sum::{SUM_PATH, sum_handler, sum_info};

/// Service name reported by the metadata endpoint.
pub const SERVICE_NAME: &str = env!("CARGO_PKG_NAME");

const LIVE_PATH: &str = "/healthz/live";
const READY_PATH: &str = "/healthz/ready";
const FIXED_PATHS: &[&str] = &["/", LIVE_PATH, READY_PATH, SUM_PATH];

/// Build the application router with all routes and the middleware chain.
///
/// Configured paths that cannot be mounted (not absolute, or already taken)
/// are not fatal: the health endpoint falls back to its default path and the
/// metrics endpoint is left out. The readiness probe reports such a
/// configuration as invalid.
pub fn build_router(state: AppState) -> Router {
    let config = state.config();

    let mut health_path = config.health.path.clone();
    if !mountable(&health_path, FIXED_PATHS) {
        let fallback = HealthConfig::default().path;
        warn!(
            path = %health_path,
            fallback = %fallback,
            "health path cannot be mounted, using default"
        );
        health_path = fallback;
    }

    let mut router = Router::new()
        .route(&health_path, get(health_full))
        .route(LIVE_PATH, get(health_live))
        .route(READY_PATH, get(health_ready))
        .route(SUM_PATH, post(sum_handler).get(sum_info))
        .route("/", get(root_handler));

    if state.metrics().is_some() {
        let metrics_path = &config.metrics.path;
        let mut taken = FIXED_PATHS.to_vec();
        taken.push(health_path.as_str());
        if mountable(metrics_path, &taken) {
            router = router.route(metrics_path, get(metrics_handler));
        } else {
            warn!(path = %metrics_path, "metrics path cannot be mounted, endpoint disabled");
        }
    }

    layered(router, &state).with_state(state)
}

/// Wrap routes in the request timeout and the middleware chain.
///
/// The timeout sits inside the chain so a 408 still carries the request ID
/// and is logged and counted like any other response.
fn layered(router: Router<AppState>, state: &AppState) -> Router<AppState> {
    let timeout = TimeoutLayer::with_status_code(
        StatusCode::REQUEST_TIMEOUT,
        state.config().server.read_timeout,
    );
    with_middleware(router.layer(timeout), state)
}

fn mountable(path: &str, taken: &[&str]) -> bool {
    path.starts_with('/') && !taken.contains(&path)
}

/// Handle GET /: service metadata and endpoint directory.
async fn root_handler(State(state): State<AppState>) -> Json<Value> {
    let config = state.config();
    Json(json!({
        "service": SERVICE_NAME,
        "version": state.version(),
        "environment": config.server.environment,
        "endpoints": {
            "health": config.health.path,
            "metrics": config.metrics.path,
            "api": {
                "v1": {
                    "sum": SUM_PATH,
                },
            },
        },
    }))
}
