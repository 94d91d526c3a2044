//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the application handlers
//! - Wire up middleware (telemetry, request ID, timeout, panics, tracing)
//! - Bind server to listener with peer address info
//! - Graceful shutdown

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::{EventSinkKind, ServerConfig};
use crate::http::request_id::RouterRequestIdExt;
use crate::http::routes;
use crate::observability::metrics::FacadeExporter;
use crate::telemetry::{
    EventSink, JsonLinesSink, ProcessLabels, RequestTelemetry, RouterTelemetryExt, TracingSink,
};

/// Build the configured event sink.
pub fn build_sink(kind: EventSinkKind) -> Arc<dyn EventSink> {
    match kind {
        EventSinkKind::Tracing => Arc::new(TracingSink),
        EventSinkKind::Stdout => Arc::new(JsonLinesSink::stdout()),
    }
}

/// HTTP server hosting the demo application behind the telemetry stage.
pub struct HttpServer {
    router: Router,
    config: ServerConfig,
}

impl HttpServer {
    /// Create a server with telemetry built from the configuration.
    pub fn new(config: ServerConfig) -> Self {
        let telemetry = RequestTelemetry::new(
            &config.telemetry,
            Arc::new(ProcessLabels::from_env()),
            build_sink(config.telemetry.event_sink),
            Arc::new(FacadeExporter),
        );
        Self::with_telemetry(config, telemetry)
    }

    /// Create a server around an existing telemetry stage.
    pub fn with_telemetry(config: ServerConfig, telemetry: RequestTelemetry) -> Self {
        let router = Self::build_router(&config, routes::router(), telemetry);
        Self { router, config }
    }

    /// Wrap `app` with all middleware layers.
    ///
    /// Outermost first: trace span, panic recovery, telemetry, timeout,
    /// request-id assignment, handlers.
    #[allow(deprecated)]
    pub fn build_router(config: &ServerConfig, app: Router, telemetry: RequestTelemetry) -> Router {
        app.with_request_id()
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .with_request_telemetry(telemetry)
            .layer(CatchPanicLayer::new())
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server until Ctrl+C.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        self.run_until(listener, shutdown_signal()).await
    }

    /// Run the server until `signal` resolves.
    pub async fn run_until<F>(self, listener: TcpListener, signal: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            entry_name = %self.config.telemetry.entry_name,
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Clone of the fully layered router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

/// Wait for shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
