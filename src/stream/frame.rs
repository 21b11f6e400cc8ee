//! Client frames: sentinel, size limit and frame sources.

use async_trait::async_trait;
use axum::extract::ws::Message;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use crate::pipeline::{GatewayError, GatewayResult, WsReader};

/// Reserved frame that ends a client stream.
pub const END_OF_STREAM: [u8; 3] = *b"EOS";

/// Largest frame accepted from a client unless configured otherwise.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

pub fn is_end_of_stream(frame: &[u8]) -> bool {
    frame == END_OF_STREAM
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLimits {
    pub max_frame_bytes: usize,
}

impl Default for StreamLimits {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl StreamLimits {
    /// Frames of exactly `max_frame_bytes` are accepted.
    pub fn check(&self, len: usize) -> GatewayResult<()> {
        if len > self.max_frame_bytes {
            return Err(GatewayError::FrameTooLarge {
                actual: len,
                max: self.max_frame_bytes,
            });
        }
        Ok(())
    }
}

/// Anything that yields client frames in order.
///
/// `Ok(None)` means the source has no more frames.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> GatewayResult<Option<Bytes>>;
}

/// WebSocket read half. Text frames are taken as their UTF-8 bytes and
/// control frames are skipped; a close frame ends the source.
#[async_trait]
impl FrameSource for WsReader {
    async fn next_frame(&mut self) -> GatewayResult<Option<Bytes>> {
        loop {
            match self.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data)),
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(Bytes::copy_from_slice(text.as_str().as_bytes())))
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Err(e)) => return Err(GatewayError::ClientStream(e.to_string())),
            }
        }
    }
}

/// In-process source, mostly for feeding a bridge from another task.
#[async_trait]
impl FrameSource for mpsc::Receiver<Bytes> {
    async fn next_frame(&mut self) -> GatewayResult<Option<Bytes>> {
        Ok(self.recv().await)
    }
}
