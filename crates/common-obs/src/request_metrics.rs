use std::fmt;

use crate::metrics::{CounterVec, HistogramVec, Registry, DEFAULT_BUCKETS};

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const APP_EVENTS_TOTAL: &str = "app_events_total";

/// Outcome attributed to a completed endpoint call, counted apart from the
/// HTTP status it produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Ok,
    ForcedSlow,
    ForcedError,
    Crash,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Ok,
        EventKind::ForcedSlow,
        EventKind::ForcedError,
        EventKind::Crash,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Ok => "ok",
            EventKind::ForcedSlow => "forced_slow",
            EventKind::ForcedError => "forced_error",
            EventKind::Crash => "crash",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request counters and latency histogram for HTTP endpoints.
///
/// Cells are keyed by the route name given at wrap time rather than the raw
/// path, so cardinality stays bounded by the number of mounted endpoints.
#[derive(Clone)]
pub struct RequestMetrics {
    requests: CounterVec,
    duration: HistogramVec,
    events: CounterVec,
}

impl RequestMetrics {
    pub fn register(registry: &Registry) -> Self {
        let requests = registry.register_counter(
            HTTP_REQUESTS_TOTAL,
            "Total number of HTTP requests",
            &["method", "route", "status"],
        );
        let duration = registry.register_histogram(
            HTTP_REQUEST_DURATION_SECONDS,
            "HTTP request duration in seconds",
            &["method", "route"],
            DEFAULT_BUCKETS,
        );
        let events = registry.register_counter(
            APP_EVENTS_TOTAL,
            "Application events (crash, forced_error, forced_slow, ok)",
            &["type"],
        );
        for kind in EventKind::ALL {
            events.ensure(&[kind.as_str()]);
        }

        Self {
            requests,
            duration,
            events,
        }
    }

    pub fn increment_request(&self, method: &str, route: &str, status: u16) {
        let status = status.to_string();
        self.requests.inc(&[method, route, status.as_str()], 1);
    }

    pub fn observe_latency(&self, method: &str, route: &str, seconds: f64) {
        self.duration.observe(&[method, route], seconds);
    }

    pub fn increment_event(&self, kind: EventKind) {
        self.events.inc(&[kind.as_str()], 1);
    }

    pub fn request_count(&self, method: &str, route: &str, status: u16) -> u64 {
        let status = status.to_string();
        self.requests.get(&[method, route, status.as_str()])
    }

    pub fn latency_samples(&self, method: &str, route: &str) -> u64 {
        self.duration.sample_count(&[method, route])
    }

    pub fn event_count(&self, kind: EventKind) -> u64 {
        self.events.get(&[kind.as_str()])
    }
}
