//! Outbound response channel of a session.
//!
//! # Responsibilities
//! - Hold the single client-facing write channel: a pending HTTP response,
//!   then (after an upgrade) the WebSocket sink
//! - Encode success and error replies for whichever transport is live
//! - Stay reachable from the handler while the pipeline task owns the
//!   session, so the watchdog can answer a stuck session
//!
//! # State Machine
//! ```text
//! Http ─┬─send response──▶ Responded ──attach websocket──▶ WebSocket ──close──▶ Closed
//!       └─start chunked──▶ Chunked ──finish──▶ Responded
//! ```
//!
//! # Design Decisions
//! - Each transition happens once; writes against the wrong state fail with
//!   `GatewayError::Outbound` instead of silently succeeding
//! - After the watchdog answers, the channel is sealed: later replies from
//!   the abandoned pipeline are rejected, so a client never sees two responses
//! - The seal is set and checked while holding the channel lock. A write that
//!   was queued behind the watchdog observes the seal once it gets the lock

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::http::StatusCode;
use axum::response::Response;
use bytes::Bytes;
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex, MutexGuard};
use tokio_stream::wrappers::ReceiverStream;

use crate::http::response::{chunked_response, error_response, json_response, with_request_id};
use crate::http::websocket::{error_message, success_message};
use crate::pipeline::error::{ErrorReply, GatewayError, GatewayResult};

pub type WsSink = SplitSink<WebSocket, Message>;

/// Receives the HTTP response (final or upgrade) produced by a pipeline.
pub type ResponseReceiver = oneshot::Receiver<Response>;

type ChunkSender = mpsc::Sender<Result<Bytes, Infallible>>;

/// Upper bound for delivering the close control frame.
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for the watchdog to take the channel and write its reply.
const TIMEOUT_REPLY_BOUND: Duration = Duration::from_secs(2);

/// Chunks buffered ahead of the client.
const CHUNK_BUFFER: usize = 16;

/// Observable state of the outbound channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// HTTP response not yet written.
    Http,
    /// HTTP response headers written, body still streaming.
    Chunked,
    /// HTTP response written (final, or the upgrade handshake).
    Responded,
    WebSocket,
    Closed,
}

enum Channel {
    Http(oneshot::Sender<Response>),
    Chunked(ChunkSender),
    Responded,
    WebSocket(WsSink),
    Closed,
}

impl Channel {
    fn state(&self) -> TransportState {
        match self {
            Channel::Http(_) => TransportState::Http,
            Channel::Chunked(_) => TransportState::Chunked,
            Channel::Responded => TransportState::Responded,
            Channel::WebSocket(_) => TransportState::WebSocket,
            Channel::Closed => TransportState::Closed,
        }
    }
}

pub struct Outbound {
    channel: Mutex<Channel>,
    sealed: AtomicBool,
}

impl Outbound {
    pub(crate) fn new() -> (Self, ResponseReceiver) {
        let (tx, rx) = oneshot::channel();
        let outbound = Self {
            channel: Mutex::new(Channel::Http(tx)),
            sealed: AtomicBool::new(false),
        };
        (outbound, rx)
    }

    pub async fn state(&self) -> TransportState {
        self.channel.lock().await.state()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    /// Lock the channel for a pipeline write, refusing once sealed.
    async fn lock_open(&self) -> GatewayResult<MutexGuard<'_, Channel>> {
        let channel = self.channel.lock().await;
        if self.is_sealed() {
            return Err(GatewayError::Outbound("response channel sealed after timeout"));
        }
        Ok(channel)
    }

    pub(crate) async fn send_response(&self, request_id: &str, response: Response) -> GatewayResult<()> {
        let mut channel = self.lock_open().await?;
        send_http(&mut channel, request_id, response)
    }

    pub(crate) async fn reply_result<T: Serialize + ?Sized>(
        &self,
        request_id: &str,
        data: &T,
    ) -> GatewayResult<()> {
        let mut channel = self.lock_open().await?;
        if matches!(*channel, Channel::Http(_)) {
            let response = json_response(StatusCode::OK, data)?;
            return send_http(&mut channel, request_id, response);
        }
        match &mut *channel {
            Channel::WebSocket(sink) => sink
                .send(success_message(request_id, data)?)
                .await
                .map_err(|e| GatewayError::ClientStream(e.to_string())),
            other => Err(unavailable(other.state())),
        }
    }

    pub(crate) async fn reply_error(&self, request_id: &str, reply: &ErrorReply) -> GatewayResult<()> {
        let mut channel = self.lock_open().await?;
        deliver_error(&mut channel, request_id, reply).await
    }

    pub(crate) async fn send_ws(&self, message: Message) -> GatewayResult<()> {
        let mut channel = self.lock_open().await?;
        match &mut *channel {
            Channel::WebSocket(sink) => sink
                .send(message)
                .await
                .map_err(|e| GatewayError::ClientStream(e.to_string())),
            other => Err(unavailable(other.state())),
        }
    }

    /// Write the response head and switch to a chunked body.
    pub(crate) async fn start_chunked(
        &self,
        request_id: &str,
        status: StatusCode,
        content_type: &str,
    ) -> GatewayResult<()> {
        let mut channel = self.lock_open().await?;
        if !matches!(*channel, Channel::Http(_)) {
            return Err(unavailable(channel.state()));
        }
        let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
        let response = chunked_response(status, content_type, ReceiverStream::new(rx));
        send_http(&mut channel, request_id, response)?;
        *channel = Channel::Chunked(tx);
        Ok(())
    }

    /// Append one chunk to a chunked body.
    pub(crate) async fn send_chunk(&self, chunk: Bytes) -> GatewayResult<()> {
        let channel = self.lock_open().await?;
        match &*channel {
            Channel::Chunked(tx) => tx
                .send(Ok(chunk))
                .await
                .map_err(|_| GatewayError::ClientStream("client stopped reading the body".to_string())),
            other => Err(unavailable(other.state())),
        }
    }

    /// End a chunked body. No-op in any other state.
    pub(crate) async fn finish_chunked(&self) {
        let mut channel = self.channel.lock().await;
        if matches!(*channel, Channel::Chunked(_)) {
            *channel = Channel::Responded;
        }
    }

    /// Seal the channel, then answer a stuck session with the timeout error.
    ///
    /// Waits a bounded time for a write in progress to finish. Returns
    /// whether the timeout reply reached the client.
    pub(crate) async fn reply_timeout(&self, request_id: &str) -> bool {
        let attempt = tokio::time::timeout(TIMEOUT_REPLY_BOUND, async {
            let mut channel = self.channel.lock().await;
            self.seal();
            let delivered = deliver_error(&mut channel, request_id, &ErrorReply::timeout())
                .await
                .is_ok();
            if matches!(*channel, Channel::Chunked(_)) {
                *channel = Channel::Responded;
            }
            delivered
        })
        .await;
        // Seal even when the lock stayed busy; the in-flight write is the last.
        self.seal();
        attempt.unwrap_or(false)
    }

    fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    /// Deliver `response` if no HTTP response has been written yet.
    pub(crate) async fn respond_if_pending(&self, request_id: &str, response: Response) -> bool {
        let Ok(mut channel) = self.lock_open().await else {
            return false;
        };
        matches!(*channel, Channel::Http(_)) && send_http(&mut channel, request_id, response).is_ok()
    }

    pub(crate) async fn attach_websocket(&self, sink: WsSink) -> GatewayResult<()> {
        let mut channel = self.channel.lock().await;
        match &*channel {
            Channel::Responded => {
                *channel = Channel::WebSocket(sink);
                Ok(())
            }
            other => Err(unavailable(other.state())),
        }
    }

    /// Send a normal-closure frame, wait `grace`, then close the socket.
    pub(crate) async fn close_websocket(&self, grace: Duration) {
        let sink = {
            let mut channel = self.channel.lock().await;
            match std::mem::replace(&mut *channel, Channel::Closed) {
                Channel::WebSocket(sink) => sink,
                other => {
                    *channel = other;
                    return;
                }
            }
        };
        let mut sink = sink;

        let close = Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: "done".into(),
        }));
        match tokio::time::timeout(CLOSE_FRAME_TIMEOUT, sink.send(close)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Failed to send close message"),
            Err(_) => tracing::warn!("Timed out sending close message"),
        }

        // The peer's close handshake completes asynchronously; give it time
        // before tearing down the socket.
        tokio::time::sleep(grace).await;

        if let Err(e) = sink.close().await {
            tracing::debug!(error = %e, "WebSocket close returned an error");
        }
    }
}

fn send_http(channel: &mut Channel, request_id: &str, response: Response) -> GatewayResult<()> {
    match std::mem::replace(channel, Channel::Responded) {
        Channel::Http(tx) => tx
            .send(with_request_id(response, request_id))
            .map_err(|_| GatewayError::Outbound("client went away before the response")),
        other => {
            let state = other.state();
            *channel = other;
            Err(unavailable(state))
        }
    }
}

async fn deliver_error(channel: &mut Channel, request_id: &str, reply: &ErrorReply) -> GatewayResult<()> {
    if matches!(*channel, Channel::Http(_)) {
        return send_http(channel, request_id, error_response(reply));
    }
    match channel {
        Channel::WebSocket(sink) => sink
            .send(error_message(request_id, reply)?)
            .await
            .map_err(|e| GatewayError::ClientStream(e.to_string())),
        other => Err(unavailable(other.state())),
    }
}

fn unavailable(state: TransportState) -> GatewayError {
    match state {
        TransportState::Http => GatewayError::Outbound("websocket not attached"),
        TransportState::Chunked => GatewayError::Outbound("http body is streaming"),
        TransportState::Responded => GatewayError::Outbound("http response already sent"),
        TransportState::WebSocket => GatewayError::Outbound("websocket already attached"),
        TransportState::Closed => GatewayError::Outbound("connection closed"),
    }
}
