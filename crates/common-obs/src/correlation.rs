use axum::http::HeaderMap;
use uuid::Uuid;

/// Header read for a caller-supplied correlation id and echoed on responses.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Resolve the correlation id for a request.
///
/// A non-empty `X-Request-Id` is trusted verbatim; otherwise a fresh UUID v4
/// is generated. The result is never empty.
pub fn resolve_request_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}
