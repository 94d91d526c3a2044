//! Trace context carrying.
//!
//! The W3C `traceparent` header is copied onto the event as an opaque
//! string. It is neither parsed nor propagated to other hops.

use axum::http::HeaderMap;

/// W3C Trace Context header.
pub const TRACEPARENT: &str = "traceparent";

/// Raw `traceparent` value of a request, if present, readable and non-empty.
pub fn extract_trace_parent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(TRACEPARENT)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
