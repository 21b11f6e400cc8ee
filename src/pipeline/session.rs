//! Per-request session context.
//!
//! # Responsibilities
//! - Carry identity: handler name, correlation id, start time, tracing span
//! - Own the transport handles: the outbound channel, the WebSocket read half
//!   and the ordered downstream connections
//! - Offer a typed key/value store so earlier steps can hand values to later
//!   ones
//!
//! # Design Decisions
//! - Steps receive `&Session`; every mutable part sits behind its own lock so
//!   parallel actions can share one session without a global lock
//! - The identity and the outbound channel live in a shared `SessionHandle`,
//!   which the handler keeps while the pipeline task owns the session. This
//!   is what lets the watchdog answer and cancel a stuck pipeline
//! - Transport handles are set once and never reassigned

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::ws::{Message, WebSocket};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method, Request, StatusCode, Uri};
use axum::response::Response;
use bytes::Bytes;
use futures_util::stream::SplitStream;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::Span;

use crate::downstream::{CallMeta, Connection};
use crate::http::request;
use crate::pipeline::error::{ErrorReply, GatewayError, GatewayResult};
use crate::pipeline::outbound::{Outbound, ResponseReceiver};
use crate::stream::StreamLimits;

/// Read half of an upgraded WebSocket.
pub type WsReader = SplitStream<WebSocket>;

/// Typed key into the session state store.
///
/// Keys are compared by name; the type parameter fixes the value type so a
/// `get` cannot silently read the wrong thing.
pub struct StateKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> StateKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for StateKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StateKey<T> {}

impl<T> std::fmt::Debug for StateKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StateKey").field(&self.name).finish()
    }
}

/// The part of a session shared between the pipeline task and its handler.
pub struct SessionHandle {
    name: String,
    request_id: OnceLock<String>,
    started_at: Instant,
    outbound: Outbound,
    cancel: CancellationToken,
    span: Span,
}

impl SessionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Correlation id, or `""` before it is assigned.
    pub fn request_id(&self) -> &str {
        self.request_id.get().map(String::as_str).unwrap_or("")
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn outbound(&self) -> &Outbound {
        &self.outbound
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    fn set_request_id(&self, id: String) -> GatewayResult<()> {
        self.request_id
            .set(id)
            .map_err(|_| GatewayError::Internal("request id already assigned".to_string()))?;
        self.span.record("request_id", self.request_id());
        Ok(())
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("name", &self.name)
            .field("request_id", &self.request_id())
            .field("elapsed", &self.elapsed())
            .finish()
    }
}

type StateMap = HashMap<&'static str, Box<dyn Any + Send + Sync>>;

/// Context for one inbound request or connection.
///
/// Cloning yields another reference to the same session, which is how
/// `Parallel` hands it to one task per action.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    handle: Arc<SessionHandle>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    parts: Mutex<Option<Parts>>,
    body: Mutex<Option<Body>>,
    ws_reader: tokio::sync::Mutex<Option<WsReader>>,
    downstream: RwLock<Vec<Arc<dyn Connection>>>,
    state: Mutex<StateMap>,
    limits: StreamLimits,
}

impl Session {
    /// Bind an inbound request. The receiver yields the HTTP response the
    /// pipeline produces.
    pub fn new(name: &str, request: Request<Body>, limits: StreamLimits) -> (Self, ResponseReceiver) {
        let (parts, body) = request.into_parts();
        let (outbound, response_rx) = Outbound::new();
        let span = tracing::info_span!(
            "session",
            handler = %name,
            method = %parts.method,
            path = %parts.uri.path(),
            request_id = tracing::field::Empty,
        );

        let inner = SessionInner {
            handle: Arc::new(SessionHandle {
                name: name.to_string(),
                request_id: OnceLock::new(),
                started_at: Instant::now(),
                outbound,
                cancel: CancellationToken::new(),
                span,
            }),
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
            parts: Mutex::new(Some(parts)),
            body: Mutex::new(Some(body)),
            ws_reader: tokio::sync::Mutex::new(None),
            downstream: RwLock::new(Vec::new()),
            state: Mutex::new(HashMap::new()),
            limits,
        };
        let session = Self {
            inner: Arc::new(inner),
        };
        (session, response_rx)
    }

    pub fn handle(&self) -> &Arc<SessionHandle> {
        &self.inner.handle
    }

    pub fn name(&self) -> &str {
        self.inner.handle.name()
    }

    pub fn request_id(&self) -> &str {
        self.inner.handle.request_id()
    }

    /// Assign the correlation id. Fails if one is already set.
    pub fn set_request_id(&self, id: impl Into<String>) -> GatewayResult<()> {
        self.inner.handle.set_request_id(id.into())
    }

    pub fn elapsed(&self) -> Duration {
        self.inner.handle.elapsed()
    }

    pub fn span(&self) -> &Span {
        self.inner.handle.span()
    }

    pub fn limits(&self) -> StreamLimits {
        self.inner.limits
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.handle.cancel.is_cancelled()
    }

    /// Resolves once the watchdog gives up on this session.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.handle.cancel.cancelled()
    }

    // Inbound request

    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn take_body(&self) -> GatewayResult<Body> {
        self.inner.body
            .lock()
            .take()
            .ok_or(GatewayError::MissingState("request body"))
    }

    pub async fn read_json<T: DeserializeOwned>(&self) -> GatewayResult<T> {
        request::read_json(self.take_body()?).await
    }

    pub async fn read_bytes(&self) -> GatewayResult<Bytes> {
        axum::body::to_bytes(self.take_body()?, request::MAX_JSON_BODY_BYTES)
            .await
            .map_err(|e| GatewayError::bad_request(format!("invalid request: {}", e)))
    }

    pub(crate) fn take_request_parts(&self) -> GatewayResult<Parts> {
        self.inner.parts
            .lock()
            .take()
            .ok_or(GatewayError::MissingState("request parts"))
    }

    // Extension state

    pub fn set<T: Send + Sync + 'static>(&self, key: StateKey<T>, value: T) {
        self.inner.state.lock().insert(key.name, Box::new(value));
    }

    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: StateKey<T>) -> GatewayResult<T> {
        let state = self.inner.state.lock();
        let value = state.get(key.name).ok_or(GatewayError::MissingState(key.name))?;
        value
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| wrong_type(key.name))
    }

    pub fn take<T: Send + Sync + 'static>(&self, key: StateKey<T>) -> GatewayResult<T> {
        let value = self
            .inner
            .state
            .lock()
            .remove(key.name)
            .ok_or(GatewayError::MissingState(key.name))?;
        value
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| wrong_type(key.name))
    }

    pub fn contains<T>(&self, key: StateKey<T>) -> bool {
        self.inner.state.lock().contains_key(key.name)
    }

    // Client transport

    /// Lock the WebSocket read half. `None` until the upgrade wrapper ran.
    pub async fn ws_reader(&self) -> tokio::sync::MutexGuard<'_, Option<WsReader>> {
        self.inner.ws_reader.lock().await
    }

    pub(crate) async fn attach_ws_reader(&self, reader: WsReader) -> GatewayResult<()> {
        let mut slot = self.inner.ws_reader.lock().await;
        if slot.is_some() {
            return Err(GatewayError::Outbound("websocket already attached"));
        }
        *slot = Some(reader);
        Ok(())
    }

    pub(crate) async fn detach_ws_reader(&self) -> Option<WsReader> {
        self.inner.ws_reader.lock().await.take()
    }

    pub async fn send_response(&self, response: Response) -> GatewayResult<()> {
        self.inner.handle.outbound.send_response(self.request_id(), response).await
    }

    /// Deliver a success payload: raw JSON over HTTP, envelope over WebSocket.
    pub async fn reply_json<T: Serialize + ?Sized>(&self, data: &T) -> GatewayResult<()> {
        self.inner.handle.outbound.reply_result(self.request_id(), data).await
    }

    pub async fn reply_error(&self, reply: &ErrorReply) -> GatewayResult<()> {
        self.inner.handle.outbound.reply_error(self.request_id(), reply).await
    }

    pub async fn send_binary(&self, payload: Bytes) -> GatewayResult<()> {
        self.inner.handle.outbound.send_ws(Message::Binary(payload)).await
    }

    /// Answer over HTTP with a body written piece by piece via
    /// [`Session::send_chunk`]. The body ends when the pipeline finishes or
    /// [`Session::finish_chunked`] is called.
    pub async fn start_chunked(&self, status: StatusCode, content_type: &str) -> GatewayResult<()> {
        self.inner.handle
            .outbound
            .start_chunked(self.request_id(), status, content_type)
            .await
    }

    pub async fn send_chunk(&self, chunk: Bytes) -> GatewayResult<()> {
        self.inner.handle.outbound.send_chunk(chunk).await
    }

    pub async fn finish_chunked(&self) {
        self.inner.handle.outbound.finish_chunked().await
    }

    // Downstream

    pub(crate) fn push_downstream(&self, connection: Arc<dyn Connection>) {
        self.inner.downstream.write().push(connection);
    }

    pub fn downstream(&self, index: usize) -> GatewayResult<Arc<dyn Connection>> {
        self.inner.downstream
            .read()
            .get(index)
            .cloned()
            .ok_or(GatewayError::NoDownstream(index))
    }

    pub fn downstream_connections(&self) -> Vec<Arc<dyn Connection>> {
        self.inner.downstream.read().clone()
    }

    pub fn downstream_count(&self) -> usize {
        self.inner.downstream.read().len()
    }

    /// Metadata attached to every downstream call made for this session.
    pub fn call_meta(&self) -> CallMeta {
        let id = self.request_id();
        CallMeta {
            request_id: (!id.is_empty()).then(|| id.to_string()),
        }
    }
}

fn wrong_type(name: &'static str) -> GatewayError {
    GatewayError::Internal(format!("session state '{}' holds a different type", name))
}
