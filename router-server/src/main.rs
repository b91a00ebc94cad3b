//! x402 facilitator router HTTP server.
//!
//! # Usage
//!
//! ```bash
//! # Run with default config (config.toml in current directory)
//! cargo run -p x402-router-server --release
//!
//! # Run with custom config path
//! x402-router --config /path/to/config.toml
//!
//! # Configure logging level
//! RUST_LOG=x402_router=debug x402-router
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to TOML configuration file (default: `config.toml`)
//! - `HOST` - Override bind address (default: `0.0.0.0`)
//! - `PORT` - Override port (default: `4022`)
//! - `RUST_LOG` - Log level filter (default: `info`)
//!
//! A `.env` file in the working directory is loaded first, if present.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use clap::Parser;
use tower_http::{cors, trace::TraceLayer};
use tracing_subscriber::EnvFilter;
use x402_router::catalog::ProcessEnv;

use x402_router_server::config::RouterServerConfig;
use x402_router_server::handlers::{RouterState, router_app};

/// How long buffered analytics events may take to drain on shutdown.
const EVENT_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "x402-router")]
#[command(about = "Routes x402 verify and settle requests across facilitators")]
struct CliArgs {
    /// Path to the TOML configuration file.
    #[arg(long, short, env = "CONFIG", default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();
    if let Err(e) = run(args).await {
        tracing::error!("Router failed: {e}");
        std::process::exit(1);
    }
}

async fn run(args: CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = RouterServerConfig::load_from(&args.config, &ProcessEnv)?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        whitelist = ?config.whitelist,
        "Loaded configuration"
    );

    let state: RouterState = Arc::new(config.build_router(&ProcessEnv)?);

    let app = router_app(Arc::clone(&state))
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Router listening on http://{addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    let recorder = state.executor().recorder();
    if tokio::time::timeout(EVENT_FLUSH_TIMEOUT, recorder.shutdown())
        .await
        .is_err()
    {
        tracing::warn!(pending = recorder.pending(), "Timed out flushing analytics events");
    }

    tracing::info!("Router shut down gracefully");
    Ok(())
}

/// Waits for Ctrl-C or SIGTERM (Unix) to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        let sigterm = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::error!("Failed to install SIGTERM handler: {e}");
                    std::future::pending::<()>().await;
                }
            }
        };
        tokio::select! {
            () = ctrl_c => tracing::info!("Received Ctrl-C, shutting down..."),
            () = sigterm => tracing::info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        tracing::info!("Received Ctrl-C, shutting down...");
    }
}
