//! Request telemetry demo server.
//!
//! Serves the demo application behind the telemetry stage:
//!
//! ```text
//!   client ──▶ trace ──▶ catch-panic ──▶ telemetry ──▶ timeout ──▶ request-id ──▶ handlers
//!                                          │
//!                                          ├──▶ event sink (tracing / stdout)
//!                                          └──▶ metrics (Prometheus scrape endpoint)
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use request_telemetry::config::{load_config, validate_config, ServerConfig};
use request_telemetry::observability::{logging, metrics};
use request_telemetry::HttpServer;

#[derive(Debug, Parser)]
#[command(name = "request-telemetry", version, about = "Request telemetry demo server")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
        if let Err(errors) = validate_config(&config) {
            return Err(format!("invalid --bind: {:?}", errors).into());
        }
    }

    logging::init_logging(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        enable_logging = config.telemetry.enable_logging,
        enable_metrics = config.telemetry.enable_metrics,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.telemetry.enable_metrics {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    HttpServer::new(config).run(listener).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
