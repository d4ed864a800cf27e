//! Response targets handed to endpoints, and the status-capturing wrapper the
//! middleware places around them.

use std::io;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;

/// The outbound side of a request as seen by an endpoint.
///
/// Implementations follow HTTP transport semantics: only the first status is
/// honoured, and writing body bytes without a status commits `200 OK`.
pub trait ResponseSink: Send {
    fn headers_mut(&mut self) -> &mut HeaderMap;

    fn set_status(&mut self, status: StatusCode);

    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// In-memory response target that becomes an axum [`Response`].
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = self.headers;
        response
    }
}

impl ResponseSink for ResponseBuffer {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn set_status(&mut self, status: StatusCode) {
        if self.status.is_none() {
            self.status = Some(status);
        }
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.status.get_or_insert(StatusCode::OK);
        self.body.extend_from_slice(bytes);
        Ok(())
    }
}

/// Pass-through wrapper that remembers the first status written.
///
/// Every call is forwarded to the wrapped sink unchanged, including any error
/// it returns.
pub struct StatusRecorder<'a> {
    inner: &'a mut dyn ResponseSink,
    status: Option<StatusCode>,
}

impl<'a> StatusRecorder<'a> {
    pub fn new(inner: &'a mut dyn ResponseSink) -> Self {
        Self {
            inner,
            status: None,
        }
    }

    /// The captured status, `200 OK` when the endpoint never set one.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }
}

impl ResponseSink for StatusRecorder<'_> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn set_status(&mut self, status: StatusCode) {
        self.status.get_or_insert(status);
        self.inner.set_status(status);
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.status.get_or_insert(StatusCode::OK);
        self.inner.write(bytes)
    }
}
