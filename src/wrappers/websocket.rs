//! WebSocket upgrade and teardown wrapper.
//!
//! # Data Flow
//! ```text
//! request parts ──WebSocketUpgrade──▶ 101 response (outbound channel)
//!                                        │ on_upgrade
//!                                        ▼
//!                     socket.split(): sink → outbound, reader → session
//!                                        │
//!                                   next.run(sess)
//!                                        │ panic: generic error envelope
//!                                        │ every exit path
//!                                        ▼
//!                     close frame (1000 "done") → grace delay → close
//! ```

use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::FromRequestParts;
use axum::response::IntoResponse;
use futures_util::StreamExt;
use tokio::sync::oneshot;

use crate::pipeline::{invoke_guarded, Action, ErrorReply, GatewayError, GatewayResult, Session, Wrapper};

/// Delay between the close frame and closing the socket.
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct UpgradeWebSocket {
    close_grace: Duration,
}

impl UpgradeWebSocket {
    pub fn new(close_grace: Duration) -> Self {
        Self { close_grace }
    }
}

impl Default for UpgradeWebSocket {
    fn default() -> Self {
        Self::new(DEFAULT_CLOSE_GRACE)
    }
}

#[async_trait]
impl Wrapper for UpgradeWebSocket {
    async fn wrap(&self, sess: &Session, next: &dyn Action) -> GatewayResult<()> {
        let mut parts = sess.take_request_parts()?;

        let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
            Ok(upgrade) => upgrade,
            Err(rejection) => {
                let reason = rejection.body_text();
                tracing::warn!(reason = %reason, "WebSocket upgrade rejected");
                sess.send_response(rejection.into_response()).await?;
                return Err(GatewayError::Upgrade(reason));
            }
        };

        let (socket_tx, socket_rx) = oneshot::channel();
        let response = upgrade.on_upgrade(move |socket| async move {
            let _ = socket_tx.send(socket);
        });
        sess.send_response(response).await?;

        let socket = tokio::select! {
            socket = socket_rx => socket.map_err(|_| {
                GatewayError::Upgrade("connection dropped during upgrade".to_string())
            })?,
            _ = sess.cancelled() => return Err(GatewayError::Cancelled),
        };

        let (sink, reader) = socket.split();
        sess.handle().outbound().attach_websocket(sink).await?;
        sess.attach_ws_reader(reader).await?;
        tracing::debug!("WebSocket connection established");

        let guarded = invoke_guarded(next, sess).await;
        if guarded.panicked() {
            if let Err(e) = sess.reply_error(&ErrorReply::server_error()).await {
                tracing::debug!(error = %e, "Could not report panic to the client");
            }
        }

        drop(sess.detach_ws_reader().await);
        sess.handle().outbound().close_websocket(self.close_grace).await;
        tracing::debug!(panicked = guarded.panicked(), "WebSocket connection closed");

        guarded.resume()
    }

    fn name(&self) -> &str {
        "upgrade_websocket"
    }
}
