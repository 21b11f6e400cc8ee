//! Shared utilities for integration tests.
//!
//! Provides an in-memory downstream and a gateway bound to an ephemeral port.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use rpc_gateway::config::GatewayConfig;
use rpc_gateway::downstream::{
    CallMeta, ClientStream, Connection, Dialer, DownstreamError, DuplexStream,
};
use rpc_gateway::http::GatewayServer;
use rpc_gateway::lifecycle::Shutdown;

/// Everything the mock downstream observed.
#[derive(Debug, Default)]
pub struct Recorder {
    pub dialed: Mutex<Vec<String>>,
    pub closed: Mutex<Vec<String>>,
    pub metas: Mutex<Vec<CallMeta>>,
    pub methods: Mutex<Vec<String>>,
    pub uploaded: Mutex<Vec<Bytes>>,
}

impl Recorder {
    pub fn open_connections(&self) -> usize {
        self.dialed.lock().len() - self.closed.lock().len()
    }
}

/// Dialer whose connections echo unary calls, count uploads and echo duplex
/// messages after scripted delays.
pub struct MockDialer {
    pub recorder: Arc<Recorder>,
    unreachable: Vec<String>,
    echo_delays_ms: Vec<u64>,
}

impl MockDialer {
    pub fn new() -> Self {
        Self {
            recorder: Arc::default(),
            unreachable: Vec::new(),
            echo_delays_ms: vec![0, 2, 4, 1, 3],
        }
    }

    pub fn unreachable(mut self, target: &str) -> Self {
        self.unreachable.push(target.to_string());
        self
    }

    /// Delays cycled through by duplex `send` and `recv` calls.
    pub fn with_echo_delays(mut self, delays_ms: Vec<u64>) -> Self {
        self.echo_delays_ms = delays_ms;
        self
    }
}

#[async_trait]
impl Dialer for MockDialer {
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
        self.recorder.dialed.lock().push(target.to_string());
        Ok(Arc::new(MockConnection {
            target: target.to_string(),
            recorder: Arc::clone(&self.recorder),
            echo_delays_ms: self.echo_delays_ms.clone(),
        }))
    }
}

struct MockConnection {
    target: String,
    recorder: Arc<Recorder>,
    echo_delays_ms: Vec<u64>,
}

impl MockConnection {
    fn observe(&self, meta: &CallMeta, method: &str) {
        self.recorder.metas.lock().push(meta.clone());
        self.recorder.methods.lock().push(method.to_string());
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn target(&self) -> &str {
        &self.target
    }

    async fn unary(&self, meta: &CallMeta, method: &str, payload: Bytes) -> Result<Bytes, DownstreamError> {
        self.observe(meta, method);
        Ok(payload)
    }

    async fn client_stream(
        &self,
        meta: &CallMeta,
        method: &str,
    ) -> Result<Arc<dyn ClientStream>, DownstreamError> {
        self.observe(meta, method);
        Ok(Arc::new(MockUpload {
            recorder: Arc::clone(&self.recorder),
            frames: AtomicU64::new(0),
        }))
    }

    async fn duplex(
        &self,
        meta: &CallMeta,
        method: &str,
    ) -> Result<Arc<dyn DuplexStream>, DownstreamError> {
        self.observe(meta, method);
        Ok(Arc::new(JitteryEcho::new(self.echo_delays_ms.clone())))
    }

    async fn close(&self) {
        self.recorder.closed.lock().push(self.target.clone());
    }
}

struct MockUpload {
    recorder: Arc<Recorder>,
    frames: AtomicU64,
}

#[async_trait]
impl ClientStream for MockUpload {
    async fn send(&self, payload: Bytes) -> Result<(), DownstreamError> {
        self.frames.fetch_add(1, Ordering::SeqCst);
        self.recorder.uploaded.lock().push(payload);
        Ok(())
    }

    async fn close_and_recv(&self) -> Result<Bytes, DownstreamError> {
        let frames = self.frames.load(Ordering::SeqCst);
        Ok(Bytes::from(format!("{{\"received\":{}}}", frames)))
    }
}

/// Echo duplex that pauses for the next scripted delay on every call.
pub struct JitteryEcho {
    queue: Mutex<VecDeque<Bytes>>,
    arrived: Notify,
    closed: std::sync::atomic::AtomicBool,
    delays_ms: Vec<u64>,
    calls: AtomicU64,
}

impl JitteryEcho {
    pub fn new(delays_ms: Vec<u64>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            arrived: Notify::new(),
            closed: std::sync::atomic::AtomicBool::new(false),
            delays_ms,
            calls: AtomicU64::new(0),
        }
    }

    fn jitter(&self) -> Duration {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        if self.delays_ms.is_empty() {
            return Duration::ZERO;
        }
        Duration::from_millis(self.delays_ms[n % self.delays_ms.len()])
    }
}

#[async_trait]
impl DuplexStream for JitteryEcho {
    async fn send(&self, payload: Bytes) -> Result<(), DownstreamError> {
        tokio::time::sleep(self.jitter()).await;
        self.queue.lock().push_back(payload);
        self.arrived.notify_one();
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Bytes>, DownstreamError> {
        tokio::time::sleep(self.jitter()).await;
        loop {
            if let Some(message) = self.queue.lock().pop_front() {
                return Ok(Some(message));
            }
            if self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }
            self.arrived.notified().await;
        }
    }

    async fn close_send(&self) -> Result<(), DownstreamError> {
        self.closed.store(true, Ordering::SeqCst);
        self.arrived.notify_one();
        Ok(())
    }
}

/// Config tuned for tests: one target, short close grace.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.downstream.targets = vec!["10.0.0.1:8686".to_string()];
    config.websocket.close_grace_ms = 10;
    config
}

/// A running gateway; dropping the `Shutdown` does not stop it, `stop` does.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
}

impl TestGateway {
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    pub fn stop(&self) {
        self.shutdown.trigger();
    }
}

/// Serve the demo API (plus anything `extra` registers) on an ephemeral port.
pub async fn spawn_gateway_with(
    config: GatewayConfig,
    dialer: Arc<dyn Dialer>,
    extra: impl FnOnce(GatewayServer) -> GatewayServer,
) -> TestGateway {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = extra(rpc_gateway::api::register(GatewayServer::new(config), dialer));
    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, receiver).await;
    });

    TestGateway { addr, shutdown }
}

pub async fn spawn_gateway(config: GatewayConfig, dialer: Arc<dyn Dialer>) -> TestGateway {
    spawn_gateway_with(config, dialer, |server| server).await
}
