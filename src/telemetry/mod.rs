//! Request telemetry subsystem.
//!
//! # Data Flow
//! ```text
//! inbound request
//!     → middleware.rs (ObservabilityMiddleware, wraps the handler chain)
//!         → address.rs (remote ip/port, x-forwarded-for)
//!         → correlation.rs (x-request-id tokens, event id)
//!         → context.rs (request-scoped errors and fields)
//!     → event.rs (Event lifecycle, finalize once)
//!         → filter.rs (skip internal endpoints)
//!         → sink.rs (tracing / JSON lines / memory)
//!     → observability::metrics (latency, errors, result codes)
//! ```
//!
//! # Design Decisions
//! - One Event per request, owned by the middleware; no cross-request state
//! - Static process labels resolved once and shared read-only
//! - Observability failures are logged and swallowed, never surfaced to clients

pub mod address;
pub mod context;
pub mod correlation;
pub mod event;
pub mod filter;
pub mod labels;
pub mod middleware;
pub mod sink;

pub use address::{resolve_remote_address, RemoteAddress, ResolveDiagnostic};
pub use context::RequestContext;
pub use correlation::{RequestIdCorrelator, X_REQUEST_ID};
pub use event::{Event, EventError, EventState, FieldValue};
pub use filter::should_log;
pub use labels::ProcessLabels;
pub use middleware::{observe_request, RequestTelemetry, RouterTelemetryExt};
pub use sink::{EventSink, JsonLinesSink, MemorySink, SinkError, TracingSink};
