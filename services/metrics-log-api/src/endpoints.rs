//! The synthetic endpoints. Each one only writes a response and attributes an
//! [`EventKind`]; timing, status capture and request logging happen in the
//! middleware.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::Query;
use axum::http::header::{CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use axum::http::request::Parts;
use axum::http::{HeaderValue, StatusCode, Uri};
use chrono::{SecondsFormat, Utc};
use common_obs::{Endpoint, EventKind, JsonLogger, LogRecord, RequestMetrics, ResponseSink};
use rand::Rng;
use serde_json::{json, Value};

use crate::exit::ProcessExit;
use crate::SERVICE_NAME;

pub const DEFAULT_SLOW_MS: i64 = 800;
pub const DEFAULT_JITTER_MS: i64 = 200;
pub const DEFAULT_ERROR_STATUS: u16 = 500;
pub const CRASH_EXIT_CODE: i32 = 1;

pub struct Root {
    metrics: Arc<RequestMetrics>,
}

impl Root {
    pub fn new(metrics: Arc<RequestMetrics>) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl Endpoint for Root {
    async fn handle(&self, _request: &Parts, response: &mut dyn ResponseSink) {
        self.metrics.increment_event(EventKind::Ok);
        let body = json!({
            "service": SERVICE_NAME,
            "status": "ok",
            "time": Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
        });
        write_json(response, &body);
    }
}

/// Sleeps for `ms` plus a random jitter in `[0, jitter)` before answering.
pub struct Slow {
    metrics: Arc<RequestMetrics>,
}

impl Slow {
    pub fn new(metrics: Arc<RequestMetrics>) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl Endpoint for Slow {
    async fn handle(&self, request: &Parts, response: &mut dyn ResponseSink) {
        let params = query_params(&request.uri);
        let base = int_param(&params, "ms", DEFAULT_SLOW_MS);
        let jitter = int_param(&params, "jitter", DEFAULT_JITTER_MS);
        let delay_ms = slow_delay_ms(base, jitter, &mut rand::thread_rng());

        tracing::debug!(delay_ms, "delaying response");
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;

        self.metrics.increment_event(EventKind::ForcedSlow);
        write_json(response, &json!({ "slow_ms": delay_ms }));
    }
}

/// Answers with the status named by `code`, clamped to the 4xx/5xx range.
pub struct ForcedError {
    metrics: Arc<RequestMetrics>,
}

impl ForcedError {
    pub fn new(metrics: Arc<RequestMetrics>) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl Endpoint for ForcedError {
    async fn handle(&self, request: &Parts, response: &mut dyn ResponseSink) {
        let params = query_params(&request.uri);
        let status = forced_status(params.get("code").map(String::as_str));

        self.metrics.increment_event(EventKind::ForcedError);

        let headers = response.headers_mut();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
        response.set_status(status);
        let body = format!("forced error {}\n", status.as_u16());
        let _ = response.write(body.as_bytes());
    }
}

/// Logs a crash notice, answers, then terminates the process.
///
/// The process exits before the middleware regains control, so this call
/// produces no request record and no request metrics.
pub struct Crash {
    metrics: Arc<RequestMetrics>,
    logger: Arc<JsonLogger>,
    exit: Arc<dyn ProcessExit>,
}

impl Crash {
    pub fn new(
        metrics: Arc<RequestMetrics>,
        logger: Arc<JsonLogger>,
        exit: Arc<dyn ProcessExit>,
    ) -> Self {
        Self {
            metrics,
            logger,
            exit,
        }
    }
}

#[async_trait]
impl Endpoint for Crash {
    async fn handle(&self, request: &Parts, response: &mut dyn ResponseSink) {
        self.metrics.increment_event(EventKind::Crash);
        self.logger.emit(
            &LogRecord::error("forced crash requested").with_extra("path", request.uri.path()),
        );

        response.set_status(StatusCode::OK);
        let _ = response.write(b"crashing now\n");

        self.logger.flush();
        self.exit.terminate(CRASH_EXIT_CODE);
    }
}

fn write_json(response: &mut dyn ResponseSink, body: &Value) {
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let mut bytes = body.to_string().into_bytes();
    bytes.push(b'\n');
    let _ = response.write(&bytes);
}

/// Query parameters by name. A repeated name keeps its first value; a
/// malformed query string reads as empty.
fn query_params(uri: &Uri) -> HashMap<String, String> {
    let pairs = Query::<Vec<(String, String)>>::try_from_uri(uri)
        .map(|Query(pairs)| pairs)
        .unwrap_or_default();
    let mut params = HashMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        params.entry(name).or_insert(value);
    }
    params
}

/// Integer parameter, falling back to `default` when missing or unparsable.
fn int_param(params: &HashMap<String, String>, name: &str, default: i64) -> i64 {
    params
        .get(name)
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Total delay for the slow endpoint; negative totals become zero.
pub fn slow_delay_ms<R: Rng + ?Sized>(base: i64, jitter: i64, rng: &mut R) -> u64 {
    let jitter = if jitter > 0 { rng.gen_range(0..jitter) } else { 0 };
    u64::try_from(base.saturating_add(jitter)).unwrap_or(0)
}

/// Status for the error endpoint. Missing, unparsable and out-of-range codes
/// all become 500.
pub fn forced_status(raw: Option<&str>) -> StatusCode {
    raw.and_then(|value| value.parse::<u16>().ok())
        .filter(|code| (400..=599).contains(code))
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}
