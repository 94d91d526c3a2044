//! Request observability middleware.
//!
//! # Data Flow
//! ```text
//! request
//!     → Event::new (start time, static labels)
//!     → RequestContext inserted into extensions
//!     → downstream chain (handlers may record errors / fields)
//!     → stop clock, resolve address + correlation tokens
//!     → should_log? → Event::finalize → EventSink
//!     → MetricsEmitter (independent of the logging decision)
//! ```
//!
//! Nothing in this stage changes the response seen by the client.

use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::Response;
use axum::Router;
use futures_util::FutureExt;

use crate::config::TelemetryConfig;
use crate::observability::metrics::{LabelSet, MetricsEmitter, MetricsExporter};
use crate::observability::tracing::extract_trace_parent;
use crate::telemetry::address::{resolve_remote_address, RemoteAddress, X_FORWARDED_FOR};
use crate::telemetry::context::RequestContext;
use crate::telemetry::correlation::RequestIdCorrelator;
use crate::telemetry::event::Event;
use crate::telemetry::filter::should_log;
use crate::telemetry::labels::ProcessLabels;
use crate::telemetry::sink::EventSink;

/// Tracing target for diagnostics about the telemetry stage itself.
pub const DIAGNOSTIC_TARGET: &str = "request_telemetry::telemetry";

/// Shared, read-only state of the observability stage.
#[derive(Clone)]
pub struct RequestTelemetry {
    inner: Arc<Inner>,
}

#[derive(Clone)]
struct Inner {
    entry_name: String,
    enable_logging: bool,
    labels: Arc<ProcessLabels>,
    correlator: RequestIdCorrelator,
    sink: Arc<dyn EventSink>,
    metrics: MetricsEmitter,
}

impl RequestTelemetry {
    pub fn new(
        config: &TelemetryConfig,
        labels: Arc<ProcessLabels>,
        sink: Arc<dyn EventSink>,
        exporter: Arc<dyn MetricsExporter>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                entry_name: config.entry_name.clone(),
                enable_logging: config.enable_logging,
                labels,
                correlator: RequestIdCorrelator::default(),
                sink,
                metrics: MetricsEmitter::new(config.enable_metrics, exporter),
            }),
        }
    }

    /// Replace the correlator, e.g. to read a different header.
    pub fn with_correlator(self, correlator: RequestIdCorrelator) -> Self {
        let mut inner = Arc::unwrap_or_clone(self.inner);
        inner.correlator = correlator;
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn entry_name(&self) -> &str {
        &self.inner.entry_name
    }

    pub fn logging_enabled(&self) -> bool {
        self.inner.enable_logging
    }

    pub fn metrics_enabled(&self) -> bool {
        self.inner.metrics.is_enabled()
    }

    fn stamp_static_labels(&self, event: &mut Event) {
        let labels = &self.inner.labels;
        event.add_field("realm", labels.realm.as_str());
        event.add_field("region", labels.region.as_str());
        event.add_field("az", labels.az.as_str());
        event.add_field("domain", labels.domain.as_str());
        event.add_field("local_ip", labels.local_ip.as_str());
        event.add_field("local_hostname", labels.local_hostname.as_str());
    }

    /// Finalize the event and feed metrics once the chain has returned.
    fn complete(&self, mut event: Event, ctx: &RequestContext, meta: RequestMeta, outcome: Outcome<'_>) {
        let elapsed = event.stop();
        let collected = ctx.collect();
        let mut errors = collected.errors;
        if let Some(panic) = outcome.panic {
            errors.push(panic);
        }
        let res_code = outcome.status.as_u16();
        let degraded = meta.remote.is_degraded();

        let labels = LabelSet::new(
            self.inner.entry_name.clone(),
            event.operation(),
            res_code.to_string(),
        );

        if let Some(diagnostic) = &meta.remote.diagnostic {
            tracing::debug!(
                target: DIAGNOSTIC_TARGET,
                operation = %event.operation(),
                %diagnostic,
                "Remote address unresolved, using sentinel"
            );
        }

        if self.inner.enable_logging && should_log(&meta.path) {
            if let Err(e) = event.set_res_code(res_code.to_string()) {
                tracing::warn!(target: DIAGNOSTIC_TARGET, error = %e, "Result code rejected");
            }
            if let Some(id) = collected.event_id {
                event.set_event_id(id);
            }

            let unwound = HeaderMap::new();
            let outgoing = self.inner.correlator.ensure_outgoing(
                outcome.headers.unwrap_or(&unwound),
                &meta.incoming_ids,
                &mut event,
            );

            let start_time = event.start_time();
            let end_time = event.end_time().unwrap_or(start_time);
            event.add_field("api.path", meta.path.as_str());
            event.add_field("api.method", meta.method);
            event.add_field("api.query", meta.query);
            event.add_field("api.protocol", meta.protocol);
            event.add_field("user_agent", meta.user_agent);
            event.add_field("incoming_request_ids", meta.incoming_ids);
            event.add_field("start_time", start_time);
            event.add_field("remote_ip", meta.remote.ip);
            event.add_field("remote_port", meta.remote.port);
            event.add_field("res_code", res_code);
            event.add_field("end_time", end_time);
            event.add_field("elapsed_ms", elapsed.as_millis() as i64);
            event.add_field("outgoing_request_ids", outgoing);
            if let Some(trace_parent) = meta.trace_parent {
                event.add_field("trace_parent", trace_parent);
            }
            for (name, value) in collected.fields {
                event.add_field(name, value);
            }
            for cause in &errors {
                event.add_error(cause.as_str());
            }

            if let Err(e) = event.finalize(self.inner.sink.as_ref()) {
                tracing::warn!(
                    target: DIAGNOSTIC_TARGET,
                    operation = %event.operation(),
                    error = %e,
                    "Failed to write request event"
                );
            }
        }

        let metrics = &self.inner.metrics;
        metrics.observe_duration(&labels, elapsed.as_secs_f64() * 1000.0);
        if !errors.is_empty() {
            metrics.increment_errors(&labels);
        }
        metrics.increment_result_code(&labels);
        if degraded {
            metrics.increment_degraded_address(&labels);
        }
    }
}

/// Request attributes captured before the chain consumes the request.
struct RequestMeta {
    path: String,
    method: String,
    query: String,
    protocol: String,
    user_agent: String,
    incoming_ids: Vec<String>,
    remote: RemoteAddress,
    trace_parent: Option<String>,
}

impl RequestMeta {
    fn capture(request: &Request, correlator: &RequestIdCorrelator) -> Self {
        let headers = request.headers();
        let transport = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string());
        let forwarded = headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok());

        Self {
            path: request.uri().path().to_string(),
            method: request.method().to_string(),
            query: request.uri().query().unwrap_or_default().to_string(),
            protocol: format!("{:?}", request.version()),
            user_agent: headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string(),
            incoming_ids: correlator.extract_incoming(headers),
            remote: resolve_remote_address(transport.as_deref(), forwarded),
            trace_parent: extract_trace_parent(headers),
        }
    }
}

/// How the downstream chain ended.
struct Outcome<'a> {
    status: StatusCode,
    headers: Option<&'a HeaderMap>,
    panic: Option<String>,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    format!("handler panicked: {}", detail)
}

/// Middleware function wrapping the downstream handler chain.
///
/// A panic in the chain still finalizes the event (result code 500)
/// before unwinding resumes.
pub async fn observe_request(
    State(telemetry): State<RequestTelemetry>,
    mut request: Request,
    next: Next,
) -> Response {
    let meta = RequestMeta::capture(&request, &telemetry.inner.correlator);

    let mut event = Event::new(format!("{}-{}", meta.method, meta.path));
    if telemetry.inner.enable_logging {
        telemetry.stamp_static_labels(&mut event);
    }
    event.set_remote_addr(meta.remote.to_string());

    let ctx = RequestContext::new(event.operation(), event.start_time());
    request.extensions_mut().insert(ctx.clone());

    event.mark_running();
    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => {
            telemetry.complete(
                event,
                &ctx,
                meta,
                Outcome {
                    status: response.status(),
                    headers: Some(response.headers()),
                    panic: None,
                },
            );
            response
        }
        Err(payload) => {
            telemetry.complete(
                event,
                &ctx,
                meta,
                Outcome {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    headers: None,
                    panic: Some(panic_message(payload.as_ref())),
                },
            );
            std::panic::resume_unwind(payload)
        }
    }
}

/// Extension trait for `axum::`[`Router`] to install the observability stage.
pub trait RouterTelemetryExt<S> {
    /// Wrap every route of the router with [`observe_request`].
    fn with_request_telemetry(self, telemetry: RequestTelemetry) -> Self;
}

impl<S> RouterTelemetryExt<S> for Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_request_telemetry(self, telemetry: RequestTelemetry) -> Self {
        self.layer(from_fn_with_state(telemetry, observe_request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::routing::get;
    use tower::ServiceExt;

    use crate::telemetry::event::{EventState, FieldValue};
    use crate::telemetry::sink::{MemorySink, SinkError};

    #[derive(Default)]
    struct Recorded {
        durations: AtomicUsize,
        errors: AtomicUsize,
        codes: Mutex<Vec<String>>,
        degraded: AtomicUsize,
    }

    impl MetricsExporter for Recorded {
        fn observe_duration(&self, _: &LabelSet, _: f64) {
            self.durations.fetch_add(1, Ordering::SeqCst);
        }
        fn increment_errors(&self, _: &LabelSet) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
        fn increment_result_code(&self, labels: &LabelSet) {
            self.codes.lock().unwrap().push(labels.res_code.clone());
        }
        fn increment_degraded_address(&self, _: &LabelSet) {
            self.degraded.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        sink: Arc<MemorySink>,
        exporter: Arc<Recorded>,
        telemetry: RequestTelemetry,
    }

    fn harness(enable_logging: bool, enable_metrics: bool) -> Harness {
        let config = TelemetryConfig {
            enable_logging,
            enable_metrics,
            ..TelemetryConfig::default()
        };
        let sink = Arc::new(MemorySink::new(64));
        let exporter = Arc::new(Recorded::default());
        let labels = Arc::new(ProcessLabels::from_lookup(
            |k| (k == "REALM").then(|| "test".to_string()),
            "10.9.9.9".into(),
            "test-host".into(),
        ));
        let telemetry = RequestTelemetry::new(&config, labels, sink.clone(), exporter.clone());
        Harness { sink, exporter, telemetry }
    }

    async fn failing(ctx: RequestContext) -> StatusCode {
        ctx.record_error("db timeout");
        ctx.record_error("retry exhausted");
        StatusCode::OK
    }

    fn app(telemetry: RequestTelemetry, peer: &str) -> Router {
        Router::new()
            .route("/users/{id}", get(|| async { "user" }))
            .route("/rk/v1/tv/{*item}", get(|| async { "tv" }))
            .route("/failing", get(failing))
            .route(
                "/assigned",
                get(|ctx: RequestContext| async move {
                    ctx.set_event_id("handler-id");
                    ctx.add_field("tenant", "acme");
                    "ok"
                }),
            )
            .route(
                "/respond-with-id",
                get(|| async { ([("x-request-id", "out-1")], "ok") }),
            )
            .with_request_telemetry(telemetry)
            .layer(axum::Extension(ConnectInfo(peer.parse::<SocketAddr>().unwrap())))
    }

    fn get_request(uri: &str) -> axum::http::request::Builder {
        axum::http::Request::builder().method("GET").uri(uri)
    }

    #[tokio::test]
    async fn forwarded_request_is_logged_with_resolved_address() {
        let h = harness(true, true);
        let response = app(h.telemetry.clone(), "10.0.0.5:51234")
            .oneshot(
                get_request("/users/42?verbose=1")
                    .header("x-forwarded-for", "203.0.113.9")
                    .header("user-agent", "curl/8.0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let events = h.sink.events();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.state(), EventState::Finished);
        assert_eq!(event.operation(), "GET-/users/42");
        assert_eq!(event.remote_addr(), "203.0.113.9:51234");
        assert_eq!(event.res_code(), Some("200"));
        assert!(event.end_time().unwrap() >= event.start_time());
        assert_eq!(event.field("remote_ip"), Some(&FieldValue::Str("203.0.113.9".into())));
        assert_eq!(event.field("remote_port"), Some(&FieldValue::Str("51234".into())));
        assert_eq!(event.field("api.query"), Some(&FieldValue::Str("verbose=1".into())));
        assert_eq!(event.field("user_agent"), Some(&FieldValue::Str("curl/8.0".into())));
        assert_eq!(event.field("realm"), Some(&FieldValue::Str("test".into())));
        assert_eq!(event.field("region"), Some(&FieldValue::Str("*".into())));
        assert_eq!(event.field("res_code"), Some(&FieldValue::Int(200)));
        assert_eq!(event.event_id(), None);

        assert_eq!(h.exporter.durations.load(Ordering::SeqCst), 1);
        assert_eq!(*h.exporter.codes.lock().unwrap(), vec!["200"]);
    }

    #[tokio::test]
    async fn fields_follow_documented_order() {
        let h = harness(true, false);
        app(h.telemetry.clone(), "10.0.0.5:1")
            .oneshot(get_request("/users/1").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let event = h.sink.events().remove(0);
        let names: Vec<&str> = event.fields().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "realm",
                "region",
                "az",
                "domain",
                "local_ip",
                "local_hostname",
                "api.path",
                "api.method",
                "api.query",
                "api.protocol",
                "user_agent",
                "incoming_request_ids",
                "start_time",
                "remote_ip",
                "remote_port",
                "res_code",
                "end_time",
                "elapsed_ms",
                "outgoing_request_ids",
            ]
        );
    }

    #[tokio::test]
    async fn internal_path_skips_log_but_records_metrics() {
        let h = harness(true, true);
        let response = app(h.telemetry.clone(), "10.0.0.5:1")
            .oneshot(get_request("/rk/v1/tv/overview").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        assert!(h.sink.is_empty());
        assert_eq!(h.exporter.durations.load(Ordering::SeqCst), 1);
        assert_eq!(h.exporter.codes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn logging_disabled_still_records_metrics() {
        let h = harness(false, true);
        app(h.telemetry.clone(), "10.0.0.5:1")
            .oneshot(get_request("/failing").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert!(h.sink.is_empty());
        assert_eq!(h.exporter.durations.load(Ordering::SeqCst), 1);
        assert_eq!(h.exporter.errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn metrics_disabled_records_nothing() {
        let h = harness(true, false);
        app(h.telemetry.clone(), "10.0.0.5:1")
            .oneshot(get_request("/failing").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(h.sink.len(), 1);
        assert_eq!(h.exporter.durations.load(Ordering::SeqCst), 0);
        assert_eq!(h.exporter.errors.load(Ordering::SeqCst), 0);
        assert!(h.exporter.codes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn two_error_causes_count_as_one_error() {
        let h = harness(true, true);
        let response = app(h.telemetry.clone(), "10.0.0.5:1")
            .oneshot(get_request("/failing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let event = h.sink.events().remove(0);
        assert_eq!(event.errors(), &["db timeout", "retry exhausted"]);
        assert_eq!(event.res_code(), Some("200"));
        assert_eq!(h.exporter.errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn event_id_joins_incoming_and_outgoing_tokens() {
        let h = harness(true, false);
        app(h.telemetry.clone(), "10.0.0.5:1")
            .oneshot(
                get_request("/respond-with-id")
                    .header("x-request-id", "in-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let event = h.sink.events().remove(0);
        assert_eq!(event.event_id(), Some("in-1,out-1"));
        assert_eq!(
            event.field("incoming_request_ids"),
            Some(&FieldValue::Strings(vec!["in-1".into()]))
        );
        assert_eq!(
            event.field("outgoing_request_ids"),
            Some(&FieldValue::Strings(vec!["out-1".into()]))
        );
    }

    #[tokio::test]
    async fn handler_assigned_event_id_and_fields_win() {
        let h = harness(true, false);
        app(h.telemetry.clone(), "10.0.0.5:1")
            .oneshot(
                get_request("/assigned")
                    .header("x-request-id", "in-1")
                    .header("traceparent", "00-abc-def-01")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let event = h.sink.events().remove(0);
        assert_eq!(event.event_id(), Some("handler-id"));
        assert_eq!(event.field("tenant"), Some(&FieldValue::Str("acme".into())));
        assert_eq!(
            event.field("trace_parent"),
            Some(&FieldValue::Str("00-abc-def-01".into()))
        );
    }

    #[tokio::test]
    async fn missing_connect_info_uses_sentinel_and_counts_degraded() {
        let h = harness(true, true);
        let router = Router::new()
            .route("/", get(|| async { "root" }))
            .with_request_telemetry(h.telemetry.clone());

        let response = router
            .oneshot(get_request("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let event = h.sink.events().remove(0);
        assert_eq!(event.remote_addr(), "0.0.0.0:0");
        assert_eq!(h.exporter.degraded.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ipv6_loopback_peer_is_localhost() {
        let h = harness(true, false);
        app(h.telemetry.clone(), "[::1]:9000")
            .oneshot(get_request("/users/7").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(h.sink.events()[0].remote_addr(), "localhost:9000");
    }

    #[tokio::test]
    async fn failing_sink_does_not_affect_response() {
        struct Broken;
        impl EventSink for Broken {
            fn write(&self, _: &Event) -> Result<(), SinkError> {
                Err(SinkError::Closed)
            }
        }

        let exporter = Arc::new(Recorded::default());
        let telemetry = RequestTelemetry::new(
            &TelemetryConfig::default(),
            Arc::new(ProcessLabels::default()),
            Arc::new(Broken),
            exporter.clone(),
        );
        let response = app(telemetry, "10.0.0.5:1")
            .oneshot(get_request("/users/1").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(exporter.durations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_requests_produce_independent_events() {
        let h = harness(true, false);
        let router = app(h.telemetry.clone(), "10.0.0.5:1");

        let a = router.clone().oneshot(
            get_request("/users/a")
                .header("x-request-id", "req-a")
                .body(Body::empty())
                .unwrap(),
        );
        let b = router.oneshot(
            get_request("/failing")
                .header("x-request-id", "req-b")
                .body(Body::empty())
                .unwrap(),
        );
        let (ra, rb) = tokio::join!(a, b);
        ra.unwrap();
        rb.unwrap();

        let events = h.sink.events();
        assert_eq!(events.len(), 2);
        let a = events.iter().find(|e| e.operation() == "GET-/users/a").unwrap();
        let b = events.iter().find(|e| e.operation() == "GET-/failing").unwrap();
        assert_eq!(a.event_id(), Some("req-a"));
        assert!(a.errors().is_empty());
        assert_eq!(b.event_id(), Some("req-b"));
        assert_eq!(b.errors().len(), 2);
    }

    #[tokio::test]
    async fn panicking_handler_is_finalized_before_unwinding() {
        let h = harness(true, true);
        let router = Router::new()
            .route(
                "/boom",
                get(|| async {
                    if true {
                        panic!("kaboom");
                    }
                    "unreachable"
                }),
            )
            .with_request_telemetry(h.telemetry.clone())
            .layer(tower_http::catch_panic::CatchPanicLayer::new())
            .layer(MockConnectInfo("10.0.0.5:1".parse::<SocketAddr>().unwrap()));

        let response = router
            .oneshot(get_request("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let event = h.sink.events().remove(0);
        assert_eq!(event.res_code(), Some("500"));
        assert_eq!(event.errors(), &["handler panicked: kaboom"]);
        assert_eq!(h.exporter.errors.load(Ordering::SeqCst), 1);
        assert_eq!(*h.exporter.codes.lock().unwrap(), vec!["500"]);
    }

    #[test]
    fn with_correlator_swaps_header() {
        let h = harness(true, true);
        let telemetry = h
            .telemetry
            .with_correlator(RequestIdCorrelator::with_header("x-correlation-id"));
        assert_eq!(telemetry.inner.correlator.header(), "x-correlation-id");
        assert!(telemetry.logging_enabled());
        assert!(telemetry.metrics_enabled());
        assert_eq!(telemetry.entry_name(), "http");
    }
}
