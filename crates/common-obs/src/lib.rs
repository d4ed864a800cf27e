//! Request-level observability: correlation ids, status capture, metrics and
//! single-line JSON logs around axum endpoints.

use std::{fmt, io};

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::{
    fmt::{self as tsfmt, format::Writer, FmtContext, FormatEvent, FormatFields, MakeWriter},
    layer::{Context, Layer, SubscriberExt},
    registry::{LookupSpan, SpanRef},
    EnvFilter, Registry as SpanRegistry,
};

pub mod correlation;
pub mod log;
pub mod metrics;
pub mod middleware;
pub mod observer;
pub mod request_metrics;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use correlation::{resolve_request_id, REQUEST_ID_HEADER};
pub use log::{JsonLogger, Level, LogRecord};
pub use metrics::{
    Counter, CounterVec, Histogram, HistogramVec, Registry, DEFAULT_BUCKETS,
    PROMETHEUS_CONTENT_TYPE,
};
pub use middleware::{Endpoint, Observability};
pub use observer::{ResponseBuffer, ResponseSink, StatusRecorder};
pub use request_metrics::{EventKind, RequestMetrics};

#[derive(Debug, thiserror::Error)]
pub enum ObsInitError {
    #[error("tracing subscriber already initialized")]
    AlreadyInitialized,
    #[error("failed to install tracing subscriber: {0}")]
    Install(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Initialize diagnostics logging for a service.
pub struct ObsInit;

impl ObsInit {
    /// Install a global tracing subscriber that writes [`LogRecord`]-shaped
    /// lines to stdout.
    pub fn init() -> Result<(), ObsInitError> {
        let subscriber = Self::subscriber_with_writer(io::stdout);
        tracing::subscriber::set_global_default(subscriber).map_err(|err| {
            if tracing::dispatcher::has_been_set() {
                ObsInitError::AlreadyInitialized
            } else {
                ObsInitError::Install(err)
            }
        })
    }

    /// Build a tracing subscriber using the provided writer.
    pub fn subscriber_with_writer<W>(writer: W) -> impl tracing::Subscriber
    where
        W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
    {
        let env_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| {
            if cfg!(debug_assertions) {
                "debug".to_string()
            } else {
                "info".to_string()
            }
        });
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(env_level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let fmt_layer = tsfmt::layer()
            .with_ansi(false)
            .event_format(RecordFormat)
            .with_writer(writer);

        SpanRegistry::default()
            .with(env_filter)
            .with(RequestIdLayer)
            .with(fmt_layer)
    }
}

/// Liveness and readiness probes; both answer `200` with an empty body.
pub fn health_router() -> Router {
    Router::new()
        .route("/healthz", get(|| async { StatusCode::OK }))
        .route("/readyz", get(|| async { StatusCode::OK }))
}

/// Request id stored on spans that declare a `request_id` field.
struct SpanRequestId(String);

struct RequestIdLayer;

impl<S> Layer<S> for RequestIdLayer
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = RequestIdVisitor::default();
        attrs.record(&mut visitor);
        if let (Some(request_id), Some(span)) = (visitor.0, ctx.span(id)) {
            span.extensions_mut().insert(SpanRequestId(request_id));
        }
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        let mut visitor = RequestIdVisitor::default();
        values.record(&mut visitor);
        if let (Some(request_id), Some(span)) = (visitor.0, ctx.span(id)) {
            let mut extensions = span.extensions_mut();
            extensions.remove::<SpanRequestId>();
            extensions.insert(SpanRequestId(request_id));
        }
    }
}

#[derive(Default)]
struct RequestIdVisitor(Option<String>);

impl Visit for RequestIdVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "request_id" {
            self.0 = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "request_id" {
            self.0 = Some(format!("{:?}", value));
        }
    }
}

/// Formats tracing events with the same line schema as [`LogRecord`].
struct RecordFormat;

impl<S, N> FormatEvent<S, N> for RecordFormat
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);
        let mut record = visitor.into_record(Level::from(*event.metadata().level()));

        if record.request_id.is_none() {
            record.request_id = ctx.lookup_current().and_then(span_request_id);
        }

        match serde_json::to_string(&record) {
            Ok(line) => writeln!(writer, "{}", line),
            Err(_) => Ok(()),
        }
    }
}

fn span_request_id<S>(span: SpanRef<'_, S>) -> Option<String>
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
{
    for scope_span in span.scope() {
        if let Some(id) = scope_span.extensions().get::<SpanRequestId>() {
            return Some(id.0.clone());
        }
    }
    None
}

#[derive(Default)]
struct RecordVisitor {
    fields: Map<String, Value>,
}

impl RecordVisitor {
    fn into_record(mut self, level: Level) -> LogRecord {
        let msg = match self.fields.remove("message") {
            Some(Value::String(msg)) => msg,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let mut record = LogRecord::new(level, msg);
        record.request_id = self.take_string("request_id");
        record.method = self.take_string("method");
        record.path = self.take_string("path");
        record.status = self.take_u64("status");
        record.latency_ms = self.take_u64("latency_ms");
        record.remote_addr = self.take_string("remote_addr");
        if !self.fields.is_empty() {
            record.extra = Some(self.fields);
        }
        record
    }

    fn take_string(&mut self, key: &str) -> Option<String> {
        match self.fields.remove(key)? {
            Value::String(value) => Some(value),
            other => Some(other.to_string()),
        }
    }

    /// Non-numeric values stay behind and end up in `extra`.
    fn take_u64(&mut self, key: &str) -> Option<u64> {
        let value = self.fields.get(key)?.as_u64()?;
        self.fields.remove(key);
        Some(value)
    }
}

impl Visit for RecordVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.fields
            .insert(field.name().to_string(), Value::String(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields
            .insert(field.name().to_string(), Value::String(value.to_string()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::Bool(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), value.into());
    }
}
