//! RPC gateway (v1)
//!
//! Accepts HTTP requests and WebSocket streams, runs each one through a
//! handler pipeline and relays the traffic to downstream RPC services.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────┐
//!                     │                    GATEWAY                       │
//!   HTTP / WebSocket  │  ┌────────┐   ┌─────────┐   ┌──────────────────┐ │
//!   ──────────────────┼─▶│ http   │──▶│ Handler │──▶│ wrappers         │ │
//!                     │  │ server │   │ watchdog│   │ request id       │ │
//!                     │  └────────┘   │ hooks   │   │ error replies    │ │
//!                     │               └─────────┘   │ websocket upgrade│ │
//!                     │                             │ downstream dial  │ │
//!                     │                             └────────┬─────────┘ │
//!                     │                                      ▼           │
//!   replies / frames  │  ┌──────────┐              ┌──────────────────┐ │   gRPC
//!   ◀─────────────────┼──│ outbound │◀─────────────│ actions + stream │─┼──────────▶
//!                     │  └──────────┘              │ relay / alternate│ │ downstream
//!                     │                            └──────────────────┘ │
//!                     │   config · logging · metrics · shutdown         │
//!                     └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use rpc_gateway::config::{load_config, GatewayConfig};
use rpc_gateway::downstream::GrpcDialer;
use rpc_gateway::http::GatewayServer;
use rpc_gateway::lifecycle::{spawn_signal_handler, Shutdown};
use rpc_gateway::observability::{init_logging, install_panic_hook, metrics};

#[derive(Parser)]
#[command(name = "rpc-gateway")]
#[command(about = "HTTP and WebSocket gateway in front of gRPC services", long_about = None)]
struct Args {
    /// TOML configuration file; built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    init_logging(&config.observability)?;
    install_panic_hook();

    tracing::info!("rpc-gateway v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        targets = ?config.downstream.targets,
        watchdog_secs = config.session.watchdog_secs,
        max_frame_bytes = config.stream.max_frame_bytes,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let dialer = Arc::new(GrpcDialer::new(config.downstream.max_message_bytes));
    let listener = TcpListener::bind(&config.listener.bind_address).await?;

    let server = rpc_gateway::api::register(GatewayServer::new(config), dialer);

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    spawn_signal_handler(shutdown);

    server.run(listener, receiver).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
