//! Downstream call shapes and error definitions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Errors raised by a downstream transport.
#[derive(Debug, Error)]
pub enum DownstreamError {
    /// Target address could not be turned into an endpoint.
    #[error("invalid downstream target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    /// Method path is not a valid RPC path.
    #[error("invalid method path '{0}'")]
    InvalidMethod(String),

    /// Connection was not established within the connect timeout.
    #[error("connect to '{target}' timed out after {timeout:?}")]
    ConnectTimeout { target: String, timeout: Duration },

    /// Connection attempt failed.
    #[error("connect to '{target}' failed: {reason}")]
    Connect { target: String, reason: String },

    /// The remote side answered a call with an error status.
    #[error("rpc {method} failed ({code}): {message}")]
    Rpc {
        method: String,
        code: String,
        message: String,
    },

    /// The stream was already closed in the direction being used.
    #[error("stream {method} is closed")]
    StreamClosed { method: String },

    /// The connection was released before the call.
    #[error("connection to '{target}' is closed")]
    Closed { target: String },
}

/// Per-call metadata propagated to the downstream service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallMeta {
    pub request_id: Option<String>,
}

/// Establishes connections to downstream targets.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connect to `target`, giving up after `connect_timeout`.
    async fn dial(
        &self,
        target: &str,
        connect_timeout: Duration,
    ) -> Result<Arc<dyn Connection>, DownstreamError>;
}

/// A live connection to one downstream target.
#[async_trait]
pub trait Connection: Send + Sync {
    fn target(&self) -> &str;

    /// Single request, single response.
    async fn unary(
        &self,
        meta: &CallMeta,
        method: &str,
        payload: Bytes,
    ) -> Result<Bytes, DownstreamError>;

    /// Many requests, one response after the send side is closed.
    async fn client_stream(
        &self,
        meta: &CallMeta,
        method: &str,
    ) -> Result<Arc<dyn ClientStream>, DownstreamError>;

    /// Independent send and receive directions on one stream.
    async fn duplex(
        &self,
        meta: &CallMeta,
        method: &str,
    ) -> Result<Arc<dyn DuplexStream>, DownstreamError>;

    /// Release the connection. Calls made afterwards fail with `Closed`.
    async fn close(&self);
}

/// Send side of a client-streaming call.
#[async_trait]
pub trait ClientStream: Send + Sync {
    async fn send(&self, payload: Bytes) -> Result<(), DownstreamError>;

    /// Half-close the stream and wait for the single response.
    async fn close_and_recv(&self) -> Result<Bytes, DownstreamError>;
}

/// A bidirectional streaming call.
///
/// Most duplex implementations forbid overlapping `send` and `recv` from
/// independent tasks; [`crate::stream::alternate`] serializes them.
#[async_trait]
pub trait DuplexStream: Send + Sync {
    async fn send(&self, payload: Bytes) -> Result<(), DownstreamError>;

    /// Next message, or `None` once the downstream ended its side.
    async fn recv(&self) -> Result<Option<Bytes>, DownstreamError>;

    async fn close_send(&self) -> Result<(), DownstreamError>;
}
