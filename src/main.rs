//! Admission-control and resilience edge for the agent demo console.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ request ID → trace → timeout → metrics
//!                         │
//!                         ▼
//!                   ┌─────────────┐  OPTIONS /api/*  ┌──────────────┐
//!                   │ origin gate │─────────────────▶│ 204 + CORS   │
//!                   └──────┬──────┘                  └──────────────┘
//!                          ▼
//!                   ┌─────────────┐
//!                   │  handler    │── identity resolver (session → role)
//!                   │             │── rate limiter (fixed window per key)
//!                   └──────┬──────┘
//!                          ▼
//!                   ┌─────────────┐
//!                   │ retrying    │──────▶ third-party service
//!                   │ HTTP client │◀────── (backoff on 5xx / 429 / network)
//!                   └─────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use demo_edge::config::{load_config, ObservabilityConfig};
use demo_edge::http::HttpServer;
use demo_edge::lifecycle::Shutdown;
use demo_edge::observability::{logging, metrics};

#[derive(Debug, Parser)]
#[command(name = "demo-edge", version, about = "Admission-control edge for the agent demo console")]
struct Args {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            logging::init_logging(&ObservabilityConfig::default());
            tracing::error!(error = %e, "Configuration rejected");
            return Err(e.into());
        }
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "demo-edge starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        app_url = ?config.cors.app_url,
        allowed_origins = config.cors.allowed_origins.len(),
        max_retries = config.retries.max_retries,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
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

    let shutdown = Shutdown::new();
    shutdown.trigger_on_signal();

    let server = HttpServer::new(config)?;
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
