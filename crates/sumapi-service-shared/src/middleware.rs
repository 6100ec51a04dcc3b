//! HTTP middleware for the sum API service.
//!
//! This module provides:
//! - [`RequestId`]: Newtype for correlation ID extraction/generation
//! - [`extract_or_generate_request_id`]: Extract X-Request-ID header or generate UUID v7
//! - [`RequestLogLayer`]: Tower middleware that assigns the request ID and logs each request
//! - [`MetricsLayer`]: Tower middleware for recording HTTP metrics
//! - [`with_middleware`]: Apply the full chain, including [`RecoveryLayer`], to a router
//!
//! # Ordering
//!
//! Outermost to innermost: recovery, request ID + logging, metrics. The
//! recovery layer must see every fault, and the metrics layer runs closest to
//! the handler so its timings exclude logging.
//!
//! # Metrics Recording
//!
//! The `MetricsLayer` records:
//! - `http_requests_in_flight`: Gauge, released by a drop guard
//! - `http_requests_total`: Counter by method, route, status code
//! - `http_request_duration_seconds`: Histogram by method, route, status code
//! - `http_request_size_bytes`: Histogram by method, route
//! - `http_response_size_bytes`: Histogram by method, route, status code

use std::convert::Infallible;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::extract::{ConnectInfo, FromRequestParts, MatchedPath};
use axum::http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue, Request, Response};
use axum::Router;
use http_body::Body;
use pin_project_lite::pin_project;
use tower::{Layer, Service};
use tracing::{info_span, Span};
use uuid::Uuid;

use crate::config::ProxyNetwork;
use crate::metrics::{HttpMetrics, RequestLabels};
use crate::recovery::RecoveryLayer;
use crate::AppState;

/// Header carrying the request correlation ID.
pub static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Route label for requests that matched no route.
pub const UNMATCHED_ROUTE: &str = "unmatched";

/// Newtype wrapper for request correlation IDs.
///
/// Stored as a request extension by the middleware chain. Handlers can take
/// it as an extractor; outside the chain the header is used, or a fresh ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

impl RequestId {
    /// Create a new request ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new UUID v7 request ID.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get the request ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The ID already assigned to this request, or the inbound header, or a new one.
    pub fn for_request<B>(req: &Request<B>) -> Self {
        req.extensions()
            .get::<RequestId>()
            .cloned()
            .unwrap_or_else(|| extract_or_generate_request_id(req.headers()))
    }

    pub(crate) fn header_value(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&self.0).ok()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<RequestId>()
            .cloned()
            .unwrap_or_else(|| extract_or_generate_request_id(&parts.headers)))
    }
}

/// Extract the request ID from headers or generate a new UUID v7.
///
/// Looks for the `X-Request-ID` header (case-insensitive). If not present,
/// empty or invalid UTF-8, generates a new UUID v7 (time-sortable).
pub fn extract_or_generate_request_id(headers: &HeaderMap) -> RequestId {
    headers
        .get(&REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(RequestId::from)
        .unwrap_or_else(RequestId::generate)
}

/// Resolve the client address, honouring forwarding headers only from trusted proxies.
///
/// When the TCP peer is inside a trusted network, `X-Forwarded-For` is walked
/// from right to left and the first untrusted hop is returned; `X-Real-IP`
/// is the fallback. Otherwise the peer address is returned as is.
pub fn resolve_client_ip(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    trusted: &[ProxyNetwork],
) -> Option<IpAddr> {
    let peer = peer?;
    let is_trusted = |ip: IpAddr| trusted.iter().any(|net| net.contains(ip));
    if !is_trusted(peer) {
        return Some(peer);
    }

    let forwarded: Vec<IpAddr> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|hop| hop.trim().parse().ok())
        .collect();
    if let Some(client) = forwarded.iter().rev().find(|ip| !is_trusted(**ip)) {
        return Some(*client);
    }
    if let Some(first) = forwarded.first() {
        return Some(*first);
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .or(Some(peer))
}

/// Descriptive fields of a request, captured before it is handed downstream.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: RequestId,
    pub method: String,
    pub path: String,
    pub client_ip: String,
    pub user_agent: String,
}

impl RequestContext {
    /// Context already attached by an outer layer, or a freshly built one.
    ///
    /// A fresh context is stored in the request extensions together with its
    /// request ID, so later layers and handlers reuse it instead of resolving
    /// the client address again.
    pub fn attach<B>(req: &mut Request<B>, trusted: &[ProxyNetwork]) -> Self {
        if let Some(context) = req.extensions().get::<RequestContext>() {
            return context.clone();
        }
        let request_id = RequestId::for_request(req);
        let context = Self::from_request(req, request_id.clone(), trusted);
        req.extensions_mut().insert(request_id);
        req.extensions_mut().insert(context.clone());
        context
    }

    pub fn from_request<B>(
        req: &Request<B>,
        request_id: RequestId,
        trusted: &[ProxyNetwork],
    ) -> Self {
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let client_ip = resolve_client_ip(req.headers(), peer, trusted)
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "-".to_string());
        let user_agent = req
            .headers()
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        Self {
            request_id,
            method: req.method().to_string(),
            path: req.uri().path().to_string(),
            client_ip,
            user_agent,
        }
    }
}

/// Apply the middleware chain to a router.
///
/// Layers added later wrap the earlier ones, so the calls below go from the
/// innermost (metrics, only when enabled) to the outermost (recovery).
pub fn with_middleware<S>(router: Router<S>, state: &AppState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let trusted = state.trusted_proxies();
    let router = match state.metrics() {
        Some(metrics) => router.layer(MetricsLayer::new(metrics.clone())),
        None => router,
    };
    router
        .layer(RequestLogLayer::new(trusted.clone()))
        .layer(RecoveryLayer::new(trusted))
}

// =============================================================================
// RequestLogLayer - request ID assignment and access logging
// =============================================================================

/// Tower layer that assigns the correlation ID, echoes it on the response and
/// writes one structured log entry per completed request.
#[derive(Debug, Clone)]
pub struct RequestLogLayer {
    trusted: Arc<[ProxyNetwork]>,
}

impl RequestLogLayer {
    pub fn new(trusted: Arc<[ProxyNetwork]>) -> Self {
        Self { trusted }
    }
}

impl<S> Layer<S> for RequestLogLayer {
    type Service = RequestLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLogService {
            inner,
            trusted: self.trusted.clone(),
        }
    }
}

/// Middleware service created by [`RequestLogLayer`].
#[derive(Debug, Clone)]
pub struct RequestLogService<S> {
    inner: S,
    trusted: Arc<[ProxyNetwork]>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RequestLogService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = RequestLogFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let start = Instant::now();
        let context = RequestContext::attach(&mut req, &self.trusted);
        let span = info_span!(
            "request",
            request_id = %context.request_id,
            method = %context.method,
            path = %context.path,
        );

        let future = {
            let _enter = span.enter();
            self.inner.call(req)
        };

        RequestLogFuture {
            inner: future,
            start,
            context,
            span,
        }
    }
}

pin_project! {
    /// Future wrapper that stamps the request ID and logs on completion.
    pub struct RequestLogFuture<F> {
        #[pin]
        inner: F,
        start: Instant,
        context: RequestContext,
        span: Span,
    }
}

impl<F, ResBody, E> Future for RequestLogFuture<F>
where
    F: Future<Output = Result<Response<ResBody>, E>>,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let _enter = this.span.enter();

        let mut response = match this.inner.poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(response)) => response,
            Poll::Ready(Err(e)) => {
                tracing::error!(
                    request_id = %this.context.request_id,
                    latency_ms = this.start.elapsed().as_millis() as u64,
                    "request failed"
                );
                return Poll::Ready(Err(e));
            }
        };

        if let Some(value) = this.context.request_id.header_value() {
            response
                .headers_mut()
                .insert(REQUEST_ID_HEADER.clone(), value);
        }

        tracing::info!(
            method = %this.context.method,
            path = %this.context.path,
            status_code = response.status().as_u16(),
            latency_ms = this.start.elapsed().as_millis() as u64,
            user_agent = %this.context.user_agent,
            client_ip = %this.context.client_ip,
            request_id = %this.context.request_id,
            "HTTP request processed"
        );

        Poll::Ready(Ok(response))
    }
}

// =============================================================================
// MetricsLayer - Tower middleware for HTTP metrics
// =============================================================================

/// Tower layer for recording HTTP metrics into an injected [`HttpMetrics`].
#[derive(Debug, Clone)]
pub struct MetricsLayer {
    metrics: HttpMetrics,
}

impl MetricsLayer {
    pub fn new(metrics: HttpMetrics) -> Self {
        Self { metrics }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsMiddleware {
            inner,
            metrics: self.metrics.clone(),
        }
    }
}

/// Middleware service that records HTTP metrics.
#[derive(Debug, Clone)]
pub struct MetricsMiddleware<S> {
    inner: S,
    metrics: HttpMetrics,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for MetricsMiddleware<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    ResBody: Body,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = MetricsFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let in_flight = InFlightGuard::enter(self.metrics.clone());
        let start = Instant::now();

        let method = req.method().to_string();
        let route = req
            .extensions()
            .get::<MatchedPath>()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| UNMATCHED_ROUTE.to_string());
        let request_size = approximate_request_size(&req);

        MetricsFuture {
            inner: self.inner.call(req),
            start,
            method,
            route,
            request_size,
            in_flight,
        }
    }
}

/// Decrements the in-flight gauge when dropped, including during unwinding.
pub struct InFlightGuard {
    metrics: HttpMetrics,
}

impl InFlightGuard {
    fn enter(metrics: HttpMetrics) -> Self {
        metrics.request_started();
        Self { metrics }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.metrics.request_ended();
    }
}

pin_project! {
    /// Future wrapper that records metrics on completion.
    pub struct MetricsFuture<F> {
        #[pin]
        inner: F,
        start: Instant,
        method: String,
        route: String,
        request_size: u64,
        in_flight: InFlightGuard,
    }
}

impl<F, ResBody, E> Future for MetricsFuture<F>
where
    F: Future<Output = Result<Response<ResBody>, E>>,
    ResBody: Body,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        let result = match this.inner.poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(result) => result,
        };

        if let Ok(response) = &result {
            let labels = RequestLabels {
                method: this.method.clone(),
                route: this.route.clone(),
                status: response.status().as_u16(),
            };
            this.in_flight.metrics.request_completed(
                &labels,
                this.start.elapsed(),
                *this.request_size,
                response_size(response),
            );
        }

        Poll::Ready(result)
    }
}

/// Approximate wire size of a request: request line, headers and declared body length.
pub fn approximate_request_size<B>(req: &Request<B>) -> u64 {
    let mut size = req.uri().to_string().len() + req.method().as_str().len();
    size += format!("{:?}", req.version()).len();
    for (name, value) in req.headers() {
        size += name.as_str().len() + value.len();
    }
    let body = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    size as u64 + body
}

fn response_size<B: Body>(response: &Response<B>) -> Option<u64> {
    response.body().size_hint().exact().or_else(|| {
        response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trusted() -> Vec<ProxyNetwork> {
        vec!["10.0.0.0/8".parse().unwrap()]
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_request_id_generate() {
        let id1 = RequestId::generate();
        let id2 = RequestId::generate();

        assert_ne!(id1, id2);
        assert_eq!(id1.as_str().len(), 36);
        assert!(id1.as_str().contains('-'));
    }

    #[test]
    fn test_extract_request_id_from_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("test-123"));

        let id = extract_or_generate_request_id(&headers);
        assert_eq!(id.as_str(), "test-123");
    }

    #[test]
    fn test_extract_request_id_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Request-ID", HeaderValue::from_static("test-456"));

        let id = extract_or_generate_request_id(&headers);
        assert_eq!(id.as_str(), "test-456");
    }

    #[test]
    fn test_extract_request_id_generates_when_missing_or_empty() {
        let id = extract_or_generate_request_id(&HeaderMap::new());
        assert_eq!(id.as_str().len(), 36);

        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static(""));
        let id = extract_or_generate_request_id(&headers);
        assert_eq!(id.as_str().len(), 36);
    }

    #[test]
    fn test_request_id_prefers_extension() {
        let mut req = Request::builder()
            .header("x-request-id", "from-header")
            .body(())
            .unwrap();
        assert_eq!(RequestId::for_request(&req).as_str(), "from-header");

        req.extensions_mut().insert(RequestId::from("pinned"));
        assert_eq!(RequestId::for_request(&req).as_str(), "pinned");
    }

    #[test]
    fn test_client_ip_untrusted_peer_ignores_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4"));
        let resolved = resolve_client_ip(&headers, Some(ip("203.0.113.5")), &trusted());
        assert_eq!(resolved, Some(ip("203.0.113.5")));
    }

    #[test]
    fn test_client_ip_trusted_peer_uses_forwarded_chain() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("198.51.100.7, 10.0.0.2"),
        );
        let resolved = resolve_client_ip(&headers, Some(ip("10.0.0.1")), &trusted());
        assert_eq!(resolved, Some(ip("198.51.100.7")));
    }

    #[test]
    fn test_client_ip_trusted_peer_falls_back_to_real_ip_then_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.9"));
        let resolved = resolve_client_ip(&headers, Some(ip("10.0.0.1")), &trusted());
        assert_eq!(resolved, Some(ip("198.51.100.9")));

        let resolved = resolve_client_ip(&HeaderMap::new(), Some(ip("10.0.0.1")), &trusted());
        assert_eq!(resolved, Some(ip("10.0.0.1")));
    }

    #[test]
    fn test_client_ip_without_peer() {
        assert_eq!(resolve_client_ip(&HeaderMap::new(), None, &trusted()), None);
    }

    #[test]
    fn test_request_context_defaults() {
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/sum?x=1")
            .header("user-agent", "curl/8.0")
            .body(())
            .unwrap();
        let ctx = RequestContext::from_request(&req, RequestId::from("r"), &trusted());
        assert_eq!(ctx.method, "POST");
        assert_eq!(ctx.path, "/api/v1/sum");
        assert_eq!(ctx.user_agent, "curl/8.0");
        assert_eq!(ctx.client_ip, "-");
    }

    #[test]
    fn test_request_context_attach_is_reused() {
        let mut req = Request::builder()
            .uri("/api/v1/sum")
            .header("x-request-id", "ctx-1")
            .header("x-forwarded-for", "203.0.113.9")
            .body(())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 4000))));

        let first = RequestContext::attach(&mut req, &trusted());
        assert_eq!(first.request_id.as_str(), "ctx-1");
        assert_eq!(first.client_ip, "203.0.113.9");
        assert_eq!(req.extensions().get::<RequestId>(), Some(&first.request_id));

        // A later layer with a different proxy list sees the stored context.
        let second = RequestContext::attach(&mut req, &[]);
        assert_eq!(second.client_ip, "203.0.113.9");
        assert_eq!(second.request_id, first.request_id);
    }

    #[test]
    fn test_approximate_request_size_counts_body_and_headers() {
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/sum")
            .header("content-length", "27")
            .body(())
            .unwrap();
        let size = approximate_request_size(&req);
        let expected = "/api/v1/sum".len()
            + "POST".len()
            + "HTTP/1.1".len()
            + "content-length".len()
            + "27".len()
            + 27;
        assert_eq!(size, expected as u64);
    }
}
