//! Request observation around endpoint handlers.
//!
//! ```text
//! request ─▶ resolve id ─▶ start timer ─▶ endpoint(StatusRecorder) ─▶ metrics ─▶ log ─▶ response
//! ```
//!
//! An endpoint that terminates the process never returns, so no metrics or
//! request record exist for that call.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::request::Parts;
use axum::http::{HeaderValue, Request};
use axum::response::Response;
use axum::routing::{any, MethodRouter};
use tracing::Instrument;

use crate::correlation::{resolve_request_id, REQUEST_ID_HEADER};
use crate::log::{JsonLogger, LogRecord};
use crate::observer::{ResponseBuffer, ResponseSink, StatusRecorder};
use crate::request_metrics::RequestMetrics;

/// Something that can answer a request by writing to a [`ResponseSink`].
#[async_trait]
pub trait Endpoint: Send + Sync + 'static {
    async fn handle(&self, request: &Parts, response: &mut dyn ResponseSink);
}

#[derive(Clone)]
pub struct Observability {
    metrics: Arc<RequestMetrics>,
    logger: Arc<JsonLogger>,
}

impl Observability {
    pub fn new(metrics: Arc<RequestMetrics>, logger: Arc<JsonLogger>) -> Self {
        Self { metrics, logger }
    }

    pub fn metrics(&self) -> &Arc<RequestMetrics> {
        &self.metrics
    }

    pub fn logger(&self) -> &Arc<JsonLogger> {
        &self.logger
    }

    /// Mount `endpoint` for every method, observed under the fixed `route` label.
    pub fn wrap<S, E>(&self, route: &'static str, endpoint: E) -> MethodRouter<S>
    where
        S: Clone + Send + Sync + 'static,
        E: Endpoint,
    {
        let observability = self.clone();
        let endpoint = Arc::new(endpoint);
        any(move |request: Request<Body>| {
            let observability = observability.clone();
            let endpoint = Arc::clone(&endpoint);
            async move { observability.observe(route, &*endpoint, request).await }
        })
    }

    pub async fn observe(
        &self,
        route: &str,
        endpoint: &dyn Endpoint,
        request: Request<Body>,
    ) -> Response {
        let (parts, _body) = request.into_parts();
        let request_id = resolve_request_id(&parts.headers);
        let remote_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.to_string());

        let mut buffer = ResponseBuffer::new();
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            buffer.headers_mut().insert(REQUEST_ID_HEADER, value);
        }

        let span = tracing::info_span!(
            "http.request",
            request_id = %request_id,
            method = %parts.method,
            route
        );

        let start = Instant::now();
        let mut recorder = StatusRecorder::new(&mut buffer);
        endpoint
            .handle(&parts, &mut recorder)
            .instrument(span)
            .await;
        let elapsed = start.elapsed();
        let status = recorder.status().as_u16();

        let method = parts.method.as_str();
        self.metrics.increment_request(method, route, status);
        self.metrics
            .observe_latency(method, route, elapsed.as_secs_f64());

        let mut record = LogRecord::info("request");
        record.request_id = Some(request_id);
        record.method = Some(method.to_string());
        record.path = Some(parts.uri.path().to_string());
        record.status = Some(u64::from(status));
        record.latency_ms = Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        record.remote_addr = remote_addr;
        self.logger.emit(&record);

        buffer.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Registry;
    use crate::testing::CaptureWriter;
    use axum::http::StatusCode;

    struct Teapot;

    #[async_trait]
    impl Endpoint for Teapot {
        async fn handle(&self, _request: &Parts, response: &mut dyn ResponseSink) {
            response.set_status(StatusCode::IM_A_TEAPOT);
            let _ = response.write(b"short and stout");
        }
    }

    struct Silent;

    #[async_trait]
    impl Endpoint for Silent {
        async fn handle(&self, _request: &Parts, _response: &mut dyn ResponseSink) {}
    }

    fn observability() -> (Observability, CaptureWriter) {
        let registry = Registry::new();
        let capture = CaptureWriter::default();
        let obs = Observability::new(
            Arc::new(RequestMetrics::register(&registry)),
            Arc::new(JsonLogger::with_writer(capture.clone())),
        );
        (obs, capture)
    }

    #[tokio::test]
    async fn records_status_metrics_and_one_log_line() {
        let (obs, capture) = observability();
        let request = Request::builder()
            .method("POST")
            .uri("/brew/earl-grey?strength=2")
            .header("x-request-id", "req-1")
            .body(Body::empty())
            .unwrap();

        let response = obs.observe("brew", &Teapot, request).await;

        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(response.headers()["x-request-id"], "req-1");
        assert_eq!(obs.metrics().request_count("POST", "brew", 418), 1);
        assert_eq!(obs.metrics().latency_samples("POST", "brew"), 1);

        let lines = capture.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["msg"], "request");
        assert_eq!(lines[0]["level"], "info");
        assert_eq!(lines[0]["request_id"], "req-1");
        assert_eq!(lines[0]["method"], "POST");
        assert_eq!(lines[0]["path"], "/brew/earl-grey");
        assert_eq!(lines[0]["status"], 418);
        assert!(lines[0].get("remote_addr").is_none());
    }

    #[tokio::test]
    async fn silent_endpoint_is_recorded_as_ok() {
        let (obs, capture) = observability();
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();

        let response = obs.observe("root", &Silent, request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers()["x-request-id"].is_empty());
        assert_eq!(obs.metrics().request_count("GET", "root", 200), 1);
        assert_eq!(capture.records_with_msg("request")[0]["status"], 200);
    }

    #[tokio::test]
    async fn remote_address_comes_from_connect_info() {
        let (obs, capture) = observability();
        let addr: SocketAddr = "10.0.0.7:51234".parse().unwrap();
        let mut request = Request::builder().uri("/").body(Body::empty()).unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));

        obs.observe("root", &Silent, request).await;

        assert_eq!(capture.lines()[0]["remote_addr"], "10.0.0.7:51234");
    }
}
