//! In-memory downstream used by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::downstream::types::{
    CallMeta, ClientStream, Connection, Dialer, DownstreamError, DuplexStream,
};

/// What happened on every fake connection of one dialer.
#[derive(Debug, Default)]
pub struct CallLog {
    pub dialed: Mutex<Vec<String>>,
    pub closed: Mutex<Vec<String>>,
    pub metas: Mutex<Vec<CallMeta>>,
    pub uploaded: Mutex<Vec<Bytes>>,
}

pub struct FakeDialer {
    pub log: Arc<CallLog>,
    unreachable: Vec<String>,
}

impl FakeDialer {
    pub fn new() -> Self {
        Self {
            log: Arc::default(),
            unreachable: Vec::new(),
        }
    }

    pub fn unreachable(mut self, target: &str) -> Self {
        self.unreachable.push(target.to_string());
        self
    }
}

#[async_trait]
impl Dialer for FakeDialer {
    async fn dial(
        &self,
        target: &str,
        connect_timeout: Duration,
    ) -> Result<Arc<dyn Connection>, DownstreamError> {
        if self.unreachable.iter().any(|t| t == target) {
            return Err(DownstreamError::ConnectTimeout {
                target: target.to_string(),
                timeout: connect_timeout,
            });
        }
        self.log.dialed.lock().push(target.to_string());
        Ok(Arc::new(FakeConnection {
            target: target.to_string(),
            log: Arc::clone(&self.log),
        }))
    }
}

/// Echoes unary payloads, counts client-stream uploads, echoes duplex calls.
pub struct FakeConnection {
    target: String,
    log: Arc<CallLog>,
}

#[async_trait]
impl Connection for FakeConnection {
    fn target(&self) -> &str {
        &self.target
    }

    async fn unary(
        &self,
        meta: &CallMeta,
        _method: &str,
        payload: Bytes,
    ) -> Result<Bytes, DownstreamError> {
        self.log.metas.lock().push(meta.clone());
        Ok(payload)
    }

    async fn client_stream(
        &self,
        meta: &CallMeta,
        _method: &str,
    ) -> Result<Arc<dyn ClientStream>, DownstreamError> {
        self.log.metas.lock().push(meta.clone());
        Ok(Arc::new(CountingUpload {
            log: Arc::clone(&self.log),
            frames: Mutex::new(0),
        }))
    }

    async fn duplex(
        &self,
        meta: &CallMeta,
        _method: &str,
    ) -> Result<Arc<dyn DuplexStream>, DownstreamError> {
        self.log.metas.lock().push(meta.clone());
        Ok(Arc::new(EchoDuplex::new()))
    }

    async fn close(&self) {
        self.log.closed.lock().push(self.target.clone());
    }
}

struct CountingUpload {
    log: Arc<CallLog>,
    frames: Mutex<usize>,
}

#[async_trait]
impl ClientStream for CountingUpload {
    async fn send(&self, payload: Bytes) -> Result<(), DownstreamError> {
        *self.frames.lock() += 1;
        self.log.uploaded.lock().push(payload);
        Ok(())
    }

    async fn close_and_recv(&self) -> Result<Bytes, DownstreamError> {
        let frames = *self.frames.lock();
        Ok(Bytes::from(format!("{{\"received\":{}}}", frames)))
    }
}

/// Duplex stream answering every message with itself.
///
/// Flags any moment where `send` and `recv` are in flight together.
pub struct EchoDuplex {
    queue: Mutex<VecDeque<Bytes>>,
    arrived: Notify,
    in_flight: AtomicBool,
    overlapped: AtomicBool,
    send_closed: AtomicBool,
    finished: AtomicBool,
}

impl EchoDuplex {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            arrived: Notify::new(),
            in_flight: AtomicBool::new(false),
            overlapped: AtomicBool::new(false),
            send_closed: AtomicBool::new(false),
            finished: AtomicBool::new(false),
        }
    }

    pub fn with_greeting(greeting: Bytes) -> Self {
        let stream = Self::new();
        stream.queue.lock().push_back(greeting);
        stream
    }

    /// Make the downstream end its side immediately.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
        self.arrived.notify_one();
    }

    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    pub fn send_closed(&self) -> bool {
        self.send_closed.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
    }

    fn exit(&self) {
        self.in_flight.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl DuplexStream for EchoDuplex {
    async fn send(&self, payload: Bytes) -> Result<(), DownstreamError> {
        self.enter();
        tokio::task::yield_now().await;
        self.queue.lock().push_back(payload);
        self.exit();
        self.arrived.notify_one();
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Bytes>, DownstreamError> {
        self.enter();
        let message = loop {
            if self.finished.load(Ordering::SeqCst) {
                break None;
            }
            if let Some(message) = self.queue.lock().pop_front() {
                break Some(message);
            }
            if self.send_closed.load(Ordering::SeqCst) {
                break None;
            }
            self.arrived.notified().await;
        };
        self.exit();
        Ok(message)
    }

    async fn close_send(&self) -> Result<(), DownstreamError> {
        self.send_closed.store(true, Ordering::SeqCst);
        self.arrived.notify_one();
        Ok(())
    }
}
