//! gRPC transport for downstream calls.
//!
//! Payloads are opaque: messages are carried as raw bytes with a
//! pass-through codec, so the gateway never needs the downstream schema.
//!
//! # Design Decisions
//! - One HTTP/2 channel per dialed target, established eagerly so that an
//!   unreachable target fails the dial rather than the first call
//! - Streaming calls run on their own task; the handles returned to actions
//!   only own channel ends
//! - `x-request-id` is attached to every call as metadata

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::client::Grpc;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Response, Status, Streaming};

use crate::downstream::types::{
    CallMeta, ClientStream, Connection, Dialer, DownstreamError, DuplexStream,
};

/// Messages buffered between an action and the call task.
const STREAM_BUFFER: usize = 16;

/// Codec that moves message bytes through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl Codec for RawCodec {
    type Encode = Bytes;
    type Decode = Bytes;
    type Encoder = RawCodec;
    type Decoder = RawCodec;

    fn encoder(&mut self) -> Self::Encoder {
        RawCodec
    }

    fn decoder(&mut self) -> Self::Decoder {
        RawCodec
    }
}

impl Encoder for RawCodec {
    type Item = Bytes;
    type Error = Status;

    fn encode(&mut self, item: Bytes, dst: &mut EncodeBuf<'_>) -> Result<(), Status> {
        dst.put_slice(&item);
        Ok(())
    }
}

impl Decoder for RawCodec {
    type Item = Bytes;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Bytes>, Status> {
        let len = src.remaining();
        Ok(Some(src.copy_to_bytes(len)))
    }
}

/// Dials downstream targets over gRPC.
#[derive(Debug, Clone)]
pub struct GrpcDialer {
    max_message_bytes: usize,
}

impl GrpcDialer {
    pub fn new(max_message_bytes: usize) -> Self {
        Self { max_message_bytes }
    }
}

#[async_trait]
impl Dialer for GrpcDialer {
    async fn dial(
        &self,
        target: &str,
        connect_timeout: Duration,
    ) -> Result<Arc<dyn Connection>, DownstreamError> {
        let uri = if target.contains("://") {
            target.to_string()
        } else {
            format!("http://{}", target)
        };

        let endpoint = Endpoint::from_shared(uri)
            .map_err(|e| DownstreamError::InvalidTarget {
                target: target.to_string(),
                reason: e.to_string(),
            })?
            .connect_timeout(connect_timeout);

        let channel = match tokio::time::timeout(connect_timeout, endpoint.connect()).await {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => {
                return Err(DownstreamError::Connect {
                    target: target.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(DownstreamError::ConnectTimeout {
                    target: target.to_string(),
                    timeout: connect_timeout,
                })
            }
        };

        Ok(Arc::new(GrpcConnection {
            target: target.to_string(),
            channel: Mutex::new(Some(channel)),
            max_message_bytes: self.max_message_bytes,
        }))
    }
}

/// One established gRPC channel.
pub struct GrpcConnection {
    target: String,
    channel: Mutex<Option<Channel>>,
    max_message_bytes: usize,
}

impl GrpcConnection {
    async fn client(&self, method: &str) -> Result<Grpc<Channel>, DownstreamError> {
        let channel = self
            .channel
            .lock()
            .clone()
            .ok_or_else(|| DownstreamError::Closed {
                target: self.target.clone(),
            })?;

        let mut grpc = Grpc::new(channel)
            .max_decoding_message_size(self.max_message_bytes)
            .max_encoding_message_size(self.max_message_bytes);

        grpc.ready().await.map_err(|e| DownstreamError::Rpc {
            method: method.to_string(),
            code: "Unavailable".to_string(),
            message: format!("service was not ready: {}", e),
        })?;

        Ok(grpc)
    }
}

#[async_trait]
impl Connection for GrpcConnection {
    fn target(&self) -> &str {
        &self.target
    }

    async fn unary(
        &self,
        meta: &CallMeta,
        method: &str,
        payload: Bytes,
    ) -> Result<Bytes, DownstreamError> {
        let path = method_path(method)?;
        let mut grpc = self.client(method).await?;

        let response = grpc
            .unary(request(meta, payload), path, RawCodec)
            .await
            .map_err(|status| rpc_error(method, status))?;

        Ok(response.into_inner())
    }

    async fn client_stream(
        &self,
        meta: &CallMeta,
        method: &str,
    ) -> Result<Arc<dyn ClientStream>, DownstreamError> {
        let path = method_path(method)?;
        let mut grpc = self.client(method).await?;

        let (tx, rx) = mpsc::channel::<Bytes>(STREAM_BUFFER);
        let outbound = request(meta, ReceiverStream::new(rx));
        let call = tokio::spawn(async move {
            grpc.client_streaming(outbound, path, RawCodec)
                .await
                .map(Response::into_inner)
        });

        Ok(Arc::new(GrpcClientStream {
            method: method.to_string(),
            tx: Mutex::new(Some(tx)),
            call: Mutex::new(Some(call)),
        }))
    }

    async fn duplex(
        &self,
        meta: &CallMeta,
        method: &str,
    ) -> Result<Arc<dyn DuplexStream>, DownstreamError> {
        let path = method_path(method)?;
        let mut grpc = self.client(method).await?;

        let (tx, rx) = mpsc::channel::<Bytes>(STREAM_BUFFER);
        let outbound = request(meta, ReceiverStream::new(rx));
        // Response headers may only arrive after the first message is sent.
        let call = tokio::spawn(async move {
            grpc.streaming(outbound, path, RawCodec)
                .await
                .map(Response::into_inner)
        });

        Ok(Arc::new(GrpcDuplexStream {
            method: method.to_string(),
            tx: Mutex::new(Some(tx)),
            inbound: tokio::sync::Mutex::new(Inbound::Pending(call)),
        }))
    }

    async fn close(&self) {
        self.channel.lock().take();
    }
}

struct GrpcClientStream {
    method: String,
    tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    call: Mutex<Option<JoinHandle<Result<Bytes, Status>>>>,
}

#[async_trait]
impl ClientStream for GrpcClientStream {
    async fn send(&self, payload: Bytes) -> Result<(), DownstreamError> {
        let tx = self.tx.lock().clone().ok_or_else(|| self.closed())?;
        tx.send(payload).await.map_err(|_| self.closed())
    }

    async fn close_and_recv(&self) -> Result<Bytes, DownstreamError> {
        self.tx.lock().take();
        let call = self.call.lock().take().ok_or_else(|| self.closed())?;

        match call.await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(status)) => Err(rpc_error(&self.method, status)),
            Err(e) => Err(DownstreamError::Rpc {
                method: self.method.clone(),
                code: "Internal".to_string(),
                message: e.to_string(),
            }),
        }
    }
}

impl GrpcClientStream {
    fn closed(&self) -> DownstreamError {
        DownstreamError::StreamClosed {
            method: self.method.clone(),
        }
    }
}

impl Drop for GrpcClientStream {
    fn drop(&mut self) {
        if let Some(call) = self.call.get_mut().take() {
            call.abort();
        }
    }
}

enum Inbound {
    Pending(JoinHandle<Result<Streaming<Bytes>, Status>>),
    Open(Streaming<Bytes>),
    Done,
}

struct GrpcDuplexStream {
    method: String,
    tx: Mutex<Option<mpsc::Sender<Bytes>>>,
    inbound: tokio::sync::Mutex<Inbound>,
}

#[async_trait]
impl DuplexStream for GrpcDuplexStream {
    async fn send(&self, payload: Bytes) -> Result<(), DownstreamError> {
        let tx = self.tx.lock().clone().ok_or_else(|| DownstreamError::StreamClosed {
            method: self.method.clone(),
        })?;
        tx.send(payload)
            .await
            .map_err(|_| DownstreamError::StreamClosed {
                method: self.method.clone(),
            })
    }

    async fn recv(&self) -> Result<Option<Bytes>, DownstreamError> {
        let mut inbound = self.inbound.lock().await;
        loop {
            match &mut *inbound {
                Inbound::Pending(call) => {
                    let joined = call.await;
                    *inbound = Inbound::Done;
                    match joined {
                        Ok(Ok(streaming)) => *inbound = Inbound::Open(streaming),
                        Ok(Err(status)) => return Err(rpc_error(&self.method, status)),
                        Err(e) => {
                            return Err(DownstreamError::Rpc {
                                method: self.method.clone(),
                                code: "Internal".to_string(),
                                message: e.to_string(),
                            })
                        }
                    }
                }
                Inbound::Open(streaming) => {
                    return match streaming.message().await {
                        Ok(Some(message)) => Ok(Some(message)),
                        Ok(None) => {
                            *inbound = Inbound::Done;
                            Ok(None)
                        }
                        Err(status) => Err(rpc_error(&self.method, status)),
                    };
                }
                Inbound::Done => return Ok(None),
            }
        }
    }

    async fn close_send(&self) -> Result<(), DownstreamError> {
        self.tx.lock().take();
        Ok(())
    }
}

impl Drop for GrpcDuplexStream {
    fn drop(&mut self) {
        if let Inbound::Pending(call) = self.inbound.get_mut() {
            call.abort();
        }
    }
}

fn method_path(method: &str) -> Result<PathAndQuery, DownstreamError> {
    PathAndQuery::try_from(method.to_string())
        .map_err(|_| DownstreamError::InvalidMethod(method.to_string()))
}

fn request<T>(meta: &CallMeta, message: T) -> Request<T> {
    let mut request = Request::new(message);
    if let Some(id) = meta.request_id.as_deref() {
        if let Ok(value) = id.parse::<MetadataValue<Ascii>>() {
            request.metadata_mut().insert("x-request-id", value);
        }
    }
    request
}

fn rpc_error(method: &str, status: Status) -> DownstreamError {
    DownstreamError::Rpc {
        method: method.to_string(),
        code: format!("{:?}", status.code()),
        message: status.message().to_string(),
    }
}
