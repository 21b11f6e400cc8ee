//! Demo API served by the gateway binary.
//!
//! | Path         | Transport | Downstream call                         |
//! |--------------|-----------|-----------------------------------------|
//! | `/httpcase`  | HTTP      | unary `/hello.Greeting/Greet`           |
//! | `/websocket` | WebSocket | client stream `/hello.StreamService/Record` |
//! | `/route`     | WebSocket | duplex `/hello.StreamService/Route`     |
//! | `/status`    | HTTP      | none                                    |

use std::sync::Arc;

use serde::Serialize;

use crate::config::GatewayConfig;
use crate::downstream::Dialer;
use crate::http::GatewayServer;
use crate::pipeline::{fn_action, http_without_downstream, GatewayError, Handler};

pub mod httpcase;
pub mod record;
pub mod route;

#[derive(Debug, Serialize)]
struct Status {
    status: &'static str,
    version: &'static str,
    downstream_targets: usize,
}

/// Liveness endpoint; never touches a downstream.
pub fn status_handler(config: &GatewayConfig) -> Handler {
    let downstream_targets = config.downstream.targets.len();
    http_without_downstream("status", config).add(fn_action("report_status", move |sess| {
        Box::pin(async move {
            sess.reply_json(&Status {
                status: "ok",
                version: env!("CARGO_PKG_VERSION"),
                downstream_targets,
            })
            .await?;
            Ok::<(), GatewayError>(())
        })
    }))
}

/// Register every demo endpoint on `server`.
pub fn register(server: GatewayServer, dialer: Arc<dyn Dialer>) -> GatewayServer {
    let config = server.config().clone();
    server
        .handle("/httpcase", httpcase::handler(&config, Arc::clone(&dialer)))
        .handle("/websocket", record::handler(&config, Arc::clone(&dialer)))
        .handle("/route", route::handler(&config, dialer))
        .handle("/status", status_handler(&config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};

    #[tokio::test]
    async fn status_reports_ok_without_downstream() {
        let handler = Arc::new(status_handler(&GatewayConfig::default()));
        let response = handler
            .serve(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["downstream_targets"], 1);
    }
}
