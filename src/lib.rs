//! Request telemetry middleware for axum services.
//!
//! Every request gets one structured event (timing, identity, remote
//! address, correlation ids, result code, error causes) and a set of
//! latency/error/result-code metrics.

pub mod config;
pub mod http;
pub mod observability;
pub mod telemetry;

pub use config::schema::ServerConfig;
pub use http::HttpServer;
pub use telemetry::{RequestContext, RequestTelemetry, RouterTelemetryExt};
