//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! telemetry middleware produces:
//!     → logging.rs (process diagnostics, event records on the subscriber)
//!     → metrics.rs (latency histogram, error/result-code counters)
//!     → tracing.rs (opaque traceparent carried onto events)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows onto every event
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
pub mod tracing;
