//! `/route`: alternating bidirectional relay over one `Route` call.
//!
//! Each client frame is sent downstream and the downstream's answer is
//! written back as a binary frame before the next client frame is read.
//! After `"EOS"` the call is half-closed, remaining answers are drained and
//! a success envelope with the exchange totals ends the session.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::GatewayConfig;
use crate::downstream::Dialer;
use crate::pipeline::{default_websocket, Action, GatewayResult, Handler, Session};
use crate::stream::{bridge_duplex, FirstTurn};

pub const ROUTE_METHOD: &str = "/hello.StreamService/Route";

pub struct BridgeRoute {
    first: FirstTurn,
}

impl BridgeRoute {
    pub fn new(first: FirstTurn) -> Self {
        Self { first }
    }
}

#[async_trait]
impl Action for BridgeRoute {
    async fn run(&self, sess: &Session) -> GatewayResult<()> {
        let connection = sess.downstream(0)?;
        let stream = connection.duplex(&sess.call_meta(), ROUTE_METHOD).await?;

        let summary = bridge_duplex(sess, stream.as_ref(), self.first).await?;
        tracing::info!(sent = summary.sent, received = summary.received, "Route exchange finished");

        sess.reply_json(&summary).await
    }

    fn name(&self) -> &str {
        "bridge_route"
    }
}

pub fn handler(config: &GatewayConfig, dialer: Arc<dyn Dialer>) -> Handler {
    default_websocket("route", config, dialer).add(Arc::new(BridgeRoute::new(FirstTurn::Send)))
}
