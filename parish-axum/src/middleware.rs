//! Request logging middleware.

use std::task::{Context, Poll};
use std::time::Instant;

use futures::future::BoxFuture;
use http::{Request, Response};
use tower_layer::Layer;
use tower_service::Service;
use tracing::{Instrument, debug, info, info_span, warn};

/// Tower layer that logs one line per request.
///
/// Each request runs inside a span carrying a fresh request id, so
/// everything logged while serving it can be correlated.
///
/// ```rust,ignore
/// let app = parish_axum::router(state).layer(RequestLogLayer::new());
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestLogLayer {
    _priv: (),
}

impl RequestLogLayer {
    /// Create the layer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S> Layer<S> for RequestLogLayer {
    type Service = RequestLog<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLog { inner }
    }
}

/// Service produced by [`RequestLogLayer`].
#[derive(Debug, Clone)]
pub struct RequestLog<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RequestLog<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let method = request.method().clone();
        let path = request.uri().path().to_owned();
        let span = info_span!(
            "request",
            request_id = %uuid::Uuid::new_v4().simple(),
            method = %method,
            path = %path,
        );
        let started = Instant::now();
        let future = span.in_scope(|| self.inner.call(request));

        Box::pin(
            async move {
                let result = future.await;
                let elapsed_ms = started.elapsed().as_millis() as u64;
                match &result {
                    Ok(response) if response.status().is_server_error() => {
                        warn!(status = response.status().as_u16(), elapsed_ms, "Request failed");
                    }
                    Ok(response) if path == "/health" => {
                        debug!(status = response.status().as_u16(), elapsed_ms, "Request served");
                    }
                    Ok(response) => {
                        info!(status = response.status().as_u16(), elapsed_ms, "Request served");
                    }
                    Err(_) => warn!(elapsed_ms, "Request errored"),
                }
                result
            }
            .instrument(span),
        )
    }
}
