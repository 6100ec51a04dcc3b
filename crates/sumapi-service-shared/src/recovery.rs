//! Fault isolation boundary for request processing.
//!
//! [`RecoveryLayer`] wraps the rest of the middleware chain. A panic raised
//! while a request is being handled is caught, logged with its payload and
//! the backtrace captured at the panic site, and turned into a 500
//! [`ErrorResponse`]. The panic payload never reaches the client, and the
//! process keeps serving other requests.
//!
//! The backtrace has to be captured by a panic hook, because the unwinding
//! stack is gone by the time `catch_unwind` returns. The hook is installed
//! once per process. It only captures while the current thread is inside a
//! recovery boundary; other panics go to the previously installed hook.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Once};
use std::task::{Context, Poll};

use axum::http::Request;
use axum::response::{IntoResponse, Response};
use pin_project_lite::pin_project;
use tower::{Layer, Service};

use crate::config::ProxyNetwork;
use crate::error_response::ErrorResponse;
use crate::middleware::{RequestContext, REQUEST_ID_HEADER};

thread_local! {
    static BOUNDARY_DEPTH: Cell<usize> = const { Cell::new(0) };
    static CAPTURED: RefCell<Option<PanicSite>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Where a caught panic was raised.
#[derive(Debug)]
struct PanicSite {
    location: String,
    backtrace: String,
}

/// Install the process-wide hook that records panic sites inside boundaries.
pub fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if BOUNDARY_DEPTH.with(Cell::get) == 0 {
                previous(info);
                return;
            }
            let site = PanicSite {
                location: info
                    .location()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "unknown".to_string()),
                backtrace: Backtrace::force_capture().to_string(),
            };
            CAPTURED.with(|captured| *captured.borrow_mut() = Some(site));
        }));
    });
}

/// Marks the current thread as inside a recovery boundary while alive.
struct Boundary;

impl Boundary {
    fn enter() -> Self {
        BOUNDARY_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Boundary
    }
}

impl Drop for Boundary {
    fn drop(&mut self) {
        BOUNDARY_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Run `f`, catching any panic it raises.
fn guarded<T>(f: impl FnOnce() -> T) -> Result<T, Box<dyn Any + Send>> {
    let _boundary = Boundary::enter();
    panic::catch_unwind(AssertUnwindSafe(f))
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn fault_response(context: &RequestContext, payload: Box<dyn Any + Send>) -> Response {
    let site = CAPTURED.with(|captured| captured.borrow_mut().take());
    let (location, backtrace) = match site {
        Some(site) => (site.location, site.backtrace),
        None => ("unknown".to_string(), String::new()),
    };

    tracing::error!(
        error = %panic_message(payload.as_ref()),
        location = %location,
        backtrace = %backtrace,
        request_id = %context.request_id,
        method = %context.method,
        path = %context.path,
        client_ip = %context.client_ip,
        user_agent = %context.user_agent,
        "Panic recovered"
    );

    let body = ErrorResponse::internal(context.path.clone(), context.request_id.as_str());
    let mut response = body.into_response();
    if let Some(value) = context.request_id.header_value() {
        response
            .headers_mut()
            .insert(REQUEST_ID_HEADER.clone(), value);
    }
    response
}

/// Tower layer that converts panics in the wrapped service into 500 responses.
#[derive(Debug, Clone)]
pub struct RecoveryLayer {
    trusted: Arc<[ProxyNetwork]>,
}

impl RecoveryLayer {
    pub fn new(trusted: Arc<[ProxyNetwork]>) -> Self {
        install_panic_hook();
        Self { trusted }
    }
}

impl<S> Layer<S> for RecoveryLayer {
    type Service = RecoveryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RecoveryService {
            inner,
            trusted: self.trusted.clone(),
        }
    }
}

/// Middleware service created by [`RecoveryLayer`].
#[derive(Debug, Clone)]
pub struct RecoveryService<S> {
    inner: S,
    trusted: Arc<[ProxyNetwork]>,
}

impl<S, ReqBody> Service<Request<ReqBody>> for RecoveryService<S>
where
    S: Service<Request<ReqBody>, Response = Response>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = RecoveryFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        // Pinned here so the 500 response and the logs agree with what the
        // inner layers saw.
        let context = RequestContext::attach(&mut req, &self.trusted);

        let inner = &mut self.inner;
        let state = match guarded(|| inner.call(req)) {
            Ok(future) => RecoveryState::Running { future },
            Err(payload) => RecoveryState::Faulted {
                response: Some(fault_response(&context, payload)),
            },
        };

        RecoveryFuture { state, context }
    }
}

pin_project! {
    /// Progress of a request inside the recovery boundary.
    #[project = RecoveryStateProj]
    pub enum RecoveryState<F> {
        Running { #[pin] future: F },
        Faulted { response: Option<Response> },
    }
}

pin_project! {
    /// Future returned by [`RecoveryService`].
    pub struct RecoveryFuture<F> {
        #[pin]
        state: RecoveryState<F>,
        context: RequestContext,
    }
}

impl<F, E> Future for RecoveryFuture<F>
where
    F: Future<Output = Result<Response, E>>,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.state.project() {
            RecoveryStateProj::Running { future } => match guarded(|| future.poll(cx)) {
                Ok(poll) => poll,
                Err(payload) => Poll::Ready(Ok(fault_response(this.context, payload))),
            },
            RecoveryStateProj::Faulted { response } => match response.take() {
                Some(response) => Poll::Ready(Ok(response)),
                None => Poll::Ready(Ok(ErrorResponse::internal(
                    this.context.path.clone(),
                    this.context.request_id.as_str(),
                )
                .into_response())),
            },
        }
    }
}
