//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Record per-request latency, error and result-code series
//! - Expose them on a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `http_server_elapsed_ms` (histogram): request latency in milliseconds
//! - `http_server_errors_total` (counter): requests that recorded any error cause
//! - `http_server_res_code_total` (counter): finalized requests by result code
//! - `http_server_remote_addr_degraded_total` (counter): requests whose remote address fell back to the sentinel
//!
//! # Design Decisions
//! - Every series carries the same `entry_name`/`operation`/`res_code` labels
//! - The backend sits behind [`MetricsExporter`] so it can be swapped
//! - Disabled emission is a no-op, never an error

use std::net::SocketAddr;
use std::sync::Arc;

use metrics::{counter, histogram, Label};
use metrics_exporter_prometheus::PrometheusBuilder;

pub const ELAPSED_MS: &str = "http_server_elapsed_ms";
pub const ERRORS_TOTAL: &str = "http_server_errors_total";
pub const RES_CODE_TOTAL: &str = "http_server_res_code_total";
pub const REMOTE_ADDR_DEGRADED_TOTAL: &str = "http_server_remote_addr_degraded_total";

/// Fixed-shape label tuple attached to every observation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LabelSet {
    pub entry_name: String,
    pub operation: String,
    pub res_code: String,
}

impl LabelSet {
    pub fn new(
        entry_name: impl Into<String>,
        operation: impl Into<String>,
        res_code: impl Into<String>,
    ) -> Self {
        Self {
            entry_name: entry_name.into(),
            operation: operation.into(),
            res_code: res_code.into(),
        }
    }

    fn to_labels(&self) -> Vec<Label> {
        vec![
            Label::new("entry_name", self.entry_name.clone()),
            Label::new("operation", self.operation.clone()),
            Label::new("res_code", self.res_code.clone()),
        ]
    }
}

/// Backend receiving request observations.
///
/// Shared by all in-flight requests; implementations must tolerate
/// concurrent calls.
pub trait MetricsExporter: Send + Sync {
    fn observe_duration(&self, labels: &LabelSet, duration_ms: f64);
    fn increment_errors(&self, labels: &LabelSet);
    fn increment_result_code(&self, labels: &LabelSet);
    fn increment_degraded_address(&self, _labels: &LabelSet) {}
}

/// Exporter writing to whatever recorder the `metrics` facade has installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct FacadeExporter;

impl MetricsExporter for FacadeExporter {
    fn observe_duration(&self, labels: &LabelSet, duration_ms: f64) {
        histogram!(ELAPSED_MS, labels.to_labels()).record(duration_ms);
    }

    fn increment_errors(&self, labels: &LabelSet) {
        counter!(ERRORS_TOTAL, labels.to_labels()).increment(1);
    }

    fn increment_result_code(&self, labels: &LabelSet) {
        counter!(RES_CODE_TOTAL, labels.to_labels()).increment(1);
    }

    fn increment_degraded_address(&self, labels: &LabelSet) {
        counter!(REMOTE_ADDR_DEGRADED_TOTAL, labels.to_labels()).increment(1);
    }
}

/// Gatekeeper in front of an exporter, honoring the metrics enable flag.
#[derive(Clone)]
pub struct MetricsEmitter {
    enabled: bool,
    exporter: Arc<dyn MetricsExporter>,
}

impl std::fmt::Debug for MetricsEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsEmitter")
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl MetricsEmitter {
    pub fn new(enabled: bool, exporter: Arc<dyn MetricsExporter>) -> Self {
        Self { enabled, exporter }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn observe_duration(&self, labels: &LabelSet, duration_ms: f64) {
        if self.enabled {
            self.exporter.observe_duration(labels, duration_ms);
        }
    }

    pub fn increment_errors(&self, labels: &LabelSet) {
        if self.enabled {
            self.exporter.increment_errors(labels);
        }
    }

    pub fn increment_result_code(&self, labels: &LabelSet) {
        if self.enabled {
            self.exporter.increment_result_code(labels);
        }
    }

    pub fn increment_degraded_address(&self, labels: &LabelSet) {
        if self.enabled {
            self.exporter.increment_degraded_address(labels);
        }
    }
}

/// Install the Prometheus exporter with an HTTP scrape listener on `addr`.
///
/// Failure is logged and leaves the process running without an exporter.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus exporter listening"),
        Err(e) => tracing::warn!(address = %addr, error = %e, "Failed to install Prometheus exporter, continuing without metrics"),
    }
}
