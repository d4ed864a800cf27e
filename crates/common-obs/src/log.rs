//! Fixed-schema JSON log lines.
//!
//! Every line is one JSON object with `ts`, `level` and `msg` always present and
//! the remaining fields omitted when absent, empty or zero.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::ERROR => Level::Error,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::INFO => Level::Info,
            _ => Level::Debug,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    #[serde(serialize_with = "serialize_ts")]
    pub ts: DateTime<Utc>,
    pub level: Level,
    pub msg: String,
    #[serde(skip_serializing_if = "is_blank")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "is_blank")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "is_blank")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub status: Option<u64>,
    #[serde(skip_serializing_if = "is_zero")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "is_blank")]
    pub remote_addr: Option<String>,
    #[serde(skip_serializing_if = "is_empty_map")]
    pub extra: Option<Map<String, Value>>,
}

impl LogRecord {
    pub fn new(level: Level, msg: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            level,
            msg: msg.into(),
            request_id: None,
            method: None,
            path: None,
            status: None,
            latency_ms: None,
            remote_addr: None,
            extra: None,
        }
    }

    pub fn info(msg: impl Into<String>) -> Self {
        Self::new(Level::Info, msg)
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self::new(Level::Error, msg)
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }
}

fn serialize_ts<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Nanos, true))
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, str::is_empty)
}

fn is_zero(value: &Option<u64>) -> bool {
    value.map_or(true, |value| value == 0)
}

fn is_empty_map(value: &Option<Map<String, Value>>) -> bool {
    value.as_ref().map_or(true, Map::is_empty)
}

/// Best-effort writer of [`LogRecord`] lines.
///
/// Each record is encoded up front and written under a line lock, so lines
/// from concurrent callers never interleave. Encoding or write failures drop
/// the record.
pub struct JsonLogger {
    writer: BoxMakeWriter,
    line_lock: Mutex<()>,
}

impl JsonLogger {
    pub fn stdout() -> Self {
        Self::with_writer(io::stdout)
    }

    pub fn with_writer<W>(writer: W) -> Self
    where
        W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
    {
        Self {
            writer: BoxMakeWriter::new(writer),
            line_lock: Mutex::new(()),
        }
    }

    pub fn emit(&self, record: &LogRecord) {
        let Ok(mut line) = serde_json::to_vec(record) else {
            return;
        };
        line.push(b'\n');

        let _guard = self.line_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut writer = self.writer.make_writer();
        let _ = writer.write_all(&line);
    }

    pub fn flush(&self) {
        let _guard = self.line_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = self.writer.make_writer().flush();
    }
}

impl fmt::Debug for JsonLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonLogger").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CaptureWriter;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn request_record_omits_absent_fields() {
        let mut record = LogRecord::info("request");
        record.request_id = Some("abc123".to_string());
        record.method = Some("GET".to_string());
        record.path = Some(String::new());
        record.status = Some(200);
        record.latency_ms = Some(0);

        let value = serde_json::to_value(&record).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object["level"], "info");
        assert_eq!(object["msg"], "request");
        assert_eq!(object["request_id"], "abc123");
        assert_eq!(object["status"], 200);
        assert!(!object.contains_key("path"));
        assert!(!object.contains_key("latency_ms"));
        assert!(!object.contains_key("remote_addr"));
        assert!(!object.contains_key("extra"));
    }

    #[test]
    fn timestamp_is_utc_with_nanoseconds() {
        let value = serde_json::to_value(LogRecord::error("boom")).unwrap();
        let ts = value["ts"].as_str().unwrap();
        assert!(ts.ends_with('Z'), "{ts}");
        let fraction = ts.rsplit('.').next().unwrap().trim_end_matches('Z');
        assert_eq!(fraction.len(), 9, "{ts}");
        assert_eq!(value["level"], "error");
    }

    #[test]
    fn extra_fields_are_nested() {
        let record = LogRecord::info("starting server").with_extra("addr", ":3000");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["extra"]["addr"], ":3000");
    }

    #[test]
    fn logger_writes_one_line_per_record() {
        let capture = CaptureWriter::default();
        let logger = JsonLogger::with_writer(capture.clone());

        logger.emit(&LogRecord::info("first"));
        logger.emit(&LogRecord::error("second"));

        let lines = capture.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["msg"], "first");
        assert_eq!(lines[1]["msg"], "second");
    }

    #[test]
    fn concurrent_emits_do_not_interleave() {
        let capture = CaptureWriter::chunked(7);
        let logger = Arc::new(JsonLogger::with_writer(capture.clone()));

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let logger = Arc::clone(&logger);
                thread::spawn(move || {
                    for n in 0..50 {
                        logger.emit(
                            &LogRecord::info("request").with_extra("n", format!("{worker}-{n}")),
                        );
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let lines = capture.lines();
        assert_eq!(lines.len(), 400);
        assert!(lines.iter().all(|line| line["msg"] == "request"));
    }
}
