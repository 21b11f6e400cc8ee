//! Client-to-downstream frame relay.
//!
//! # Data Flow
//! ```text
//! WebSocket frames ──▶ Relay (sentinel / size / cancellation)
//!                         │
//!                         ├─▶ forward(frame) ──▶ ClientStream::send       relay_to_client_stream
//!                         └─▶ alternate(..)  ◀─▶ DuplexStream             bridge_duplex
//! ```
//!
//! # Design Decisions
//! - The sentinel is checked before the size limit and is never forwarded
//! - A client that closes before sending the sentinel has violated the
//!   protocol; partial uploads are not treated as complete
//! - Forward errors end the relay immediately

use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::downstream::{ClientStream, DuplexStream};
use crate::observability::metrics;
use crate::pipeline::{GatewayError, GatewayResult, Session};
use crate::stream::alternate::{alternate, ExchangeSummary, FirstTurn};
use crate::stream::frame::{is_end_of_stream, FrameSource, StreamLimits};

/// Totals for one relayed client stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelaySummary {
    pub frames: u64,
    pub bytes: u64,
}

/// Applies the client stream rules on top of a raw frame source.
///
/// Yields data frames, `None` at the sentinel, and an error for oversized
/// frames, early close or cancellation.
pub struct Relay<'a, S: ?Sized> {
    source: &'a mut S,
    limits: StreamLimits,
    cancel: &'a CancellationToken,
    summary: RelaySummary,
    finished: bool,
}

impl<'a, S: FrameSource + ?Sized> Relay<'a, S> {
    pub fn new(source: &'a mut S, limits: StreamLimits, cancel: &'a CancellationToken) -> Self {
        Self {
            source,
            limits,
            cancel,
            summary: RelaySummary::default(),
            finished: false,
        }
    }

    pub fn summary(&self) -> RelaySummary {
        self.summary
    }
}

#[async_trait]
impl<'a, S: FrameSource + ?Sized> FrameSource for Relay<'a, S> {
    async fn next_frame(&mut self) -> GatewayResult<Option<Bytes>> {
        if self.finished {
            return Ok(None);
        }

        let frame = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(GatewayError::Cancelled),
            frame = self.source.next_frame() => frame?,
        };

        let frame = frame.ok_or_else(|| {
            GatewayError::ClientStream("client closed the stream before end-of-stream".to_string())
        })?;

        if is_end_of_stream(&frame) {
            self.finished = true;
            return Ok(None);
        }

        self.limits.check(frame.len())?;

        self.summary.frames += 1;
        self.summary.bytes += frame.len() as u64;
        metrics::record_frame("inbound", frame.len());
        Ok(Some(frame))
    }
}

/// Read frames from `source` and hand each to `forward` until the sentinel.
pub async fn relay_frames<S, F, Fut>(
    source: &mut S,
    limits: StreamLimits,
    cancel: &CancellationToken,
    mut forward: F,
) -> GatewayResult<RelaySummary>
where
    S: FrameSource + ?Sized,
    F: FnMut(Bytes) -> Fut,
    Fut: Future<Output = GatewayResult<()>>,
{
    let mut relay = Relay::new(source, limits, cancel);
    while let Some(frame) = relay.next_frame().await? {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            result = forward(frame) => result?,
        }
    }
    Ok(relay.summary())
}

/// Relay the session's WebSocket frames through `forward`.
pub async fn stream_foreach<F, Fut>(sess: &Session, forward: F) -> GatewayResult<RelaySummary>
where
    F: FnMut(Bytes) -> Fut,
    Fut: Future<Output = GatewayResult<()>>,
{
    let mut reader = sess.ws_reader().await;
    let reader = reader
        .as_mut()
        .ok_or(GatewayError::Outbound("websocket not attached"))?;
    relay_frames(reader, sess.limits(), sess.handle().cancellation(), forward).await
}

/// Upload the session's frames into a client-streaming call.
pub async fn relay_to_client_stream(
    sess: &Session,
    stream: &dyn ClientStream,
) -> GatewayResult<RelaySummary> {
    stream_foreach(sess, |frame| async move {
        stream.send(frame).await.map_err(GatewayError::from)
    })
    .await
}

/// Bridge the session's WebSocket with a duplex call in alternating turns.
///
/// Client frames go downstream; each downstream message is written back to
/// the client as a binary frame.
pub async fn bridge_duplex(
    sess: &Session,
    stream: &dyn DuplexStream,
    first: FirstTurn,
) -> GatewayResult<ExchangeSummary> {
    let mut reader = sess.ws_reader().await;
    let reader = reader
        .as_mut()
        .ok_or(GatewayError::Outbound("websocket not attached"))?;
    let mut relay = Relay::new(reader, sess.limits(), sess.handle().cancellation());

    alternate(stream, first, &mut relay, |message| async move {
        metrics::record_frame("outbound", message.len());
        sess.send_binary(message).await
    })
    .await
}
