//! Handlers for `/api/v1/sum`.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use tracing::{error, info};

use sumapi_lib::{Error as LibError, MAX_NUMBERS, MIN_NUMBERS, SumRequest, SumResponse};
use sumapi_service_shared::{AppState, RequestId, from_lib_error};

pub const SUM_PATH: &str = "/api/v1/sum";

/// Handle POST /api/v1/sum requests.
///
/// The body is decoded as JSON whatever its declared content type.
pub async fn sum_handler(
    State(state): State<AppState>,
    request_id: RequestId,
    uri: Uri,
    body: Bytes,
) -> Response {
    let path = uri.path();

    let request = match SumRequest::from_json(&body) {
        Ok(request) => request,
        Err(e) => {
            error!(
                error = %e,
                component = "sum_handler",
                operation = "bind_request",
                request_id = %request_id,
                "Failed to bind request"
            );
            return reject(&state, e, path, &request_id);
        }
    };

    if let Err(e) = request.validate() {
        error!(
            error = %e,
            component = "sum_handler",
            operation = "validate_request",
            request_id = %request_id,
            number_count = request.numbers.len(),
            "Request validation failed"
        );
        return reject(&state, e.into(), path, &request_id);
    }

    info!(
        component = "sum_handler",
        operation = "calculate_sum",
        request_id = %request_id,
        number_count = request.numbers.len(),
        "Processing sum calculation"
    );

    let count = request.numbers.len();
    let response = match SumResponse::new(request.numbers, request_id.as_str()) {
        Ok(response) => response,
        Err(e) => {
            error!(
                error = %e,
                component = "sum_handler",
                operation = "calculate_sum",
                request_id = %request_id,
                number_count = count,
                "Sum is not representable"
            );
            return reject(&state, e.into(), path, &request_id);
        }
    };

    info!(
        component = "sum_handler",
        operation = "sum_calculated",
        request_id = %request_id,
        sum = response.sum,
        count = response.count,
        "Sum calculation completed"
    );

    if let Some(metrics) = state.metrics() {
        metrics.record_sum_outcome("ok");
        metrics.record_sum_numbers(response.count);
    }

    (StatusCode::OK, Json(response)).into_response()
}

/// Count the failed request and render it as an error response.
fn reject(state: &AppState, error: LibError, path: &str, request_id: &RequestId) -> Response {
    let outcome = match error {
        LibError::Decode(_) => "invalid_request_body",
        LibError::Validation(_) => "validation_error",
    };
    if let Some(metrics) = state.metrics() {
        metrics.record_sum_outcome(outcome);
    }
    let body = from_lib_error(&error, path, request_id.as_str());
    body.into_response()
}

/// Handle GET /api/v1/sum: describe the endpoint.
pub async fn sum_info(request_id: RequestId) -> Json<Value> {
    info!(
        component = "sum_handler",
        operation = "get_info",
        request_id = %request_id,
        "Sum endpoint info requested"
    );

    let example = [1.5, 2.5, 3.0];
    Json(json!({
        "endpoint": SUM_PATH,
        "method": "POST",
        "description": "Calculate the sum of an array of numbers",
        "request_format": {
            "numbers": format!("array of numbers (min: {}, max: {})", MIN_NUMBERS, MAX_NUMBERS),
        },
        "example_request": { "numbers": example },
        "example_response": {
            "sum": 7.0,
            "count": example.len(),
            "numbers": example,
            "timestamp": "2024-01-01T00:00:00Z",
        },
        "request_id": request_id.as_str(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, routing::post};
    use axum_test::TestServer;
    use sumapi_service_shared::test_utils::test_state;
    use sumapi_service_shared::{ErrorCode, ErrorResponse};

    fn counted_once(rendered: &str, outcome: &str) -> bool {
        let line = format!("sum_requests_total{{outcome=\"{}\"}} 1", outcome);
        rendered.lines().any(|l| l == line)
    }

    fn server(state: AppState) -> TestServer {
        let app = Router::new()
            .route(SUM_PATH, post(sum_handler).get(sum_info))
            .with_state(state);
        TestServer::new(app).unwrap()
    }

    #[tokio::test]
    async fn test_sum_valid_request() {
        let response = server(test_state())
            .post(SUM_PATH)
            .json(&json!({"numbers": [1.5, 2.5, 3.0]}))
            .await;
        response.assert_status_ok();

        let body: SumResponse = response.json();
        assert_eq!(body.sum, 7.0);
        assert_eq!(body.count, 3);
        assert_eq!(body.numbers, vec![1.5, 2.5, 3.0]);
    }

    #[tokio::test]
    async fn test_sum_ignores_content_type() {
        let response = server(test_state())
            .post(SUM_PATH)
            .text(r#"{"numbers": [1, 2]}"#)
            .await;
        response.assert_status_ok();
        let body: SumResponse = response.json();
        assert_eq!(body.sum, 3.0);
    }

    #[tokio::test]
    async fn test_sum_too_few_numbers() {
        let response = server(test_state())
            .post(SUM_PATH)
            .json(&json!({"numbers": [1]}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);

        let body: ErrorResponse = response.json();
        assert_eq!(body.code, ErrorCode::ValidationError);
        assert_eq!(body.path, SUM_PATH);
        assert!(body.error.contains("at least 2"));
    }

    #[tokio::test]
    async fn test_sum_invalid_json() {
        let response = server(test_state())
            .post(SUM_PATH)
            .text("\"invalid json\"")
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);

        let body: ErrorResponse = response.json();
        assert_eq!(body.code, ErrorCode::InvalidRequestBody);
    }

    #[tokio::test]
    async fn test_sum_records_outcomes() {
        let state = test_state();
        let server = server(state.clone());
        server
            .post(SUM_PATH)
            .json(&json!({"numbers": [1, 2]}))
            .await;
        server.post(SUM_PATH).json(&json!({"numbers": []})).await;
        server.post(SUM_PATH).text("nope").await;

        let rendered = state.metrics().unwrap().render();
        assert!(counted_once(&rendered, "ok"));
        assert!(counted_once(&rendered, "validation_error"));
        assert!(counted_once(&rendered, "invalid_request_body"));
    }

    #[tokio::test]
    async fn test_sum_overflow_is_rejected() {
        let state = test_state();
        let response = server(state.clone())
            .post(SUM_PATH)
            .json(&json!({"numbers": [1e308, 1e308]}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);

        let body: ErrorResponse = response.json();
        assert_eq!(body.code, ErrorCode::ValidationError);
        assert_eq!(body.error, "sum is not representable as a finite number");

        let rendered = state.metrics().unwrap().render();
        assert!(counted_once(&rendered, "validation_error"));
    }

    #[tokio::test]
    async fn test_sum_info() {
        let response = server(test_state()).get(SUM_PATH).await;
        response.assert_status_ok();

        let body: Value = response.json();
        assert_eq!(body["endpoint"], SUM_PATH);
        assert_eq!(body["method"], "POST");
        assert_eq!(
            body["request_format"]["numbers"],
            "array of numbers (min: 2, max: 100)"
        );
        assert_eq!(body["example_response"]["sum"], 7.0);
        assert_eq!(body["example_response"]["count"], 3);
        assert!(!body["request_id"].as_str().unwrap().is_empty());
    }
}
