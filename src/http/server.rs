//! HTTP server setup.
//!
//! # Responsibilities
//! - Map each path to one pipeline `Handler`
//! - Wire up the tower-http trace layer
//! - Serve until the shutdown broadcast fires, then drain
//!
//! # Design Decisions
//! - Handlers own all request processing; the router only dispatches
//! - Any method reaches the handler; WebSocket upgrades are GETs on the
//!   same path

use std::sync::Arc;

use axum::extract::Request;
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::pipeline::Handler;

/// HTTP/WebSocket front of the gateway.
pub struct GatewayServer {
    router: Router,
    config: GatewayConfig,
    paths: Vec<String>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            router: Router::new(),
            config,
            paths: Vec::new(),
        }
    }

    /// Route `path` to `handler`.
    pub fn handle(mut self, path: &str, handler: Handler) -> Self {
        let handler = Arc::new(handler);
        tracing::debug!(path = %path, handler = %handler.name(), "Registering handler");

        self.router = self.router.route(
            path,
            any(move |request: Request| {
                let handler = Arc::clone(&handler);
                async move { handler.serve(request).await }
            }),
        );
        self.paths.push(path.to_string());
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// The router with all middleware layers.
    pub fn into_router(self) -> Router {
        self.router
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            paths = ?self.paths,
            "Gateway server starting"
        );

        axum::serve(listener, self.into_router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Gateway server draining");
            })
            .await?;

        tracing::info!("Gateway server stopped");
        Ok(())
    }
}
