//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use request_telemetry::config::{ServerConfig, TelemetryConfig};
use request_telemetry::http::HttpServer;
use request_telemetry::observability::metrics::{LabelSet, MetricsExporter};
use request_telemetry::telemetry::{EventSink, MemorySink, ProcessLabels, RequestTelemetry};

/// Exporter that remembers every observation.
#[derive(Default)]
pub struct RecordingExporter {
    pub durations: Mutex<Vec<LabelSet>>,
    pub errors: AtomicUsize,
    pub res_codes: Mutex<Vec<String>>,
    pub degraded: AtomicUsize,
}

#[allow(dead_code)]
impl RecordingExporter {
    pub fn duration_count(&self) -> usize {
        self.durations.lock().unwrap().len()
    }

    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    pub fn res_codes(&self) -> Vec<String> {
        self.res_codes.lock().unwrap().clone()
    }
}

impl MetricsExporter for RecordingExporter {
    fn observe_duration(&self, labels: &LabelSet, _duration_ms: f64) {
        self.durations.lock().unwrap().push(labels.clone());
    }

    fn increment_errors(&self, _labels: &LabelSet) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_result_code(&self, labels: &LabelSet) {
        self.res_codes.lock().unwrap().push(labels.res_code.clone());
    }

    fn increment_degraded_address(&self, _labels: &LabelSet) {
        self.degraded.fetch_add(1, Ordering::SeqCst);
    }
}

/// A server running on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub sink: Arc<MemorySink>,
    pub exporter: Arc<RecordingExporter>,
    shutdown: Option<oneshot::Sender<()>>,
}

#[allow(dead_code)]
impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop();
    }
}

pub fn telemetry(
    telemetry_config: &TelemetryConfig,
    sink: Arc<dyn EventSink>,
    exporter: Arc<RecordingExporter>,
) -> RequestTelemetry {
    RequestTelemetry::new(
        telemetry_config,
        Arc::new(ProcessLabels::default()),
        sink,
        exporter,
    )
}

/// Start the demo application with in-memory sink and recording exporter.
#[allow(dead_code)]
pub async fn start_server(telemetry_config: TelemetryConfig) -> TestServer {
    let sink = Arc::new(MemorySink::new(1024));
    let exporter = Arc::new(RecordingExporter::default());
    let config = ServerConfig {
        telemetry: telemetry_config.clone(),
        ..ServerConfig::default()
    };
    let server = HttpServer::with_telemetry(
        config,
        telemetry(&telemetry_config, sink.clone(), exporter.clone()),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let _ = server
            .run_until(listener, async {
                let _ = rx.await;
            })
            .await;
    });

    TestServer {
        addr,
        sink,
        exporter,
        shutdown: Some(tx),
    }
}

/// Start a custom application behind the full middleware stack.
#[allow(dead_code)]
pub async fn start_app(app: Router, sink: Arc<dyn EventSink>) -> (SocketAddr, Arc<RecordingExporter>, oneshot::Sender<()>) {
    let exporter = Arc::new(RecordingExporter::default());
    let config = ServerConfig::default();
    let router = HttpServer::build_router(
        &config,
        app,
        telemetry(&config.telemetry, sink, exporter.clone()),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            let _ = rx.await;
        })
        .await;
    });

    (addr, exporter, tx)
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
