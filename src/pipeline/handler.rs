//! Handler: binds a pipeline to an inbound entry point.
//!
//! # Responsibilities
//! - Allocate a session per request and run the pipeline on its own task
//! - Bound the session with a watchdog; on expiry answer the client with a
//!   timeout, seal the outbound channel and cancel the session
//! - Recover from pipeline panics and errors, running exactly one hook for
//!   every terminal state other than `Completed`
//! - Log and record latency and outcome for every session
//!
//! # State Machine
//! ```text
//! Start ──spawn──▶ Running ─┬─▶ Completed
//!                           ├─▶ Errored(err)     → on_error
//!                           ├─▶ Panicked(msg)    → on_panic
//!                           └─▶ TimedOut         → on_error(Timeout)
//! ```
//!
//! # Design Decisions
//! - A timed-out pipeline is not aborted. It observes the cancellation token
//!   at its next await point and finishes on its own; its late replies are
//!   rejected by the sealed channel
//! - If the pipeline finishes without writing an HTTP response, the handler
//!   writes one: empty 200 on success, the error's reply otherwise

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use tracing::Instrument;

use crate::config::GatewayConfig;
use crate::downstream::Dialer;
use crate::http::response::{error_response, with_request_id};
use crate::observability::metrics;
use crate::pipeline::action::{with_wrappers, Action, Sequence, Wrapper};
use crate::pipeline::error::{ErrorReply, GatewayError};
use crate::pipeline::session::{Session, SessionHandle};
use crate::stream::StreamLimits;
use crate::wrappers::{AcquireDownstream, AssignRequestId, ReplyErrors, UpgradeWebSocket};

/// Default wall-clock bound for one session.
pub const DEFAULT_WATCHDOG: Duration = Duration::from_secs(600);

pub type ErrorHook = Arc<dyn Fn(&SessionHandle, &GatewayError) + Send + Sync>;
pub type PanicHook = Arc<dyn Fn(&SessionHandle, &str) + Send + Sync>;

/// Terminal state of one session.
#[derive(Debug)]
pub enum Outcome {
    Completed,
    Errored(GatewayError),
    Panicked(String),
    TimedOut,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Errored(_) => "errored",
            Outcome::Panicked(_) => "panicked",
            Outcome::TimedOut => "timed_out",
        }
    }
}

pub struct Handler {
    name: String,
    wrappers: Vec<Arc<dyn Wrapper>>,
    actions: Vec<Arc<dyn Action>>,
    watchdog: Duration,
    limits: StreamLimits,
    on_error: ErrorHook,
    on_panic: PanicHook,
}

impl Handler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            wrappers: Vec::new(),
            actions: Vec::new(),
            watchdog: DEFAULT_WATCHDOG,
            limits: StreamLimits::default(),
            on_error: Arc::new(log_error),
            on_panic: Arc::new(log_panic),
        }
    }

    /// Take the watchdog and stream limits from configuration.
    pub fn configured(mut self, config: &GatewayConfig) -> Self {
        self.watchdog = config.session.watchdog();
        self.limits = config.stream.limits();
        self
    }

    /// Append wrappers inside the ones already configured.
    pub fn use_wrappers(mut self, wrappers: impl IntoIterator<Item = Arc<dyn Wrapper>>) -> Self {
        self.wrappers.extend(wrappers);
        self
    }

    /// Insert a wrapper outside all others.
    pub fn use_first(mut self, wrapper: Arc<dyn Wrapper>) -> Self {
        self.wrappers.insert(0, wrapper);
        self
    }

    pub fn add(mut self, action: Arc<dyn Action>) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_watchdog(mut self, watchdog: Duration) -> Self {
        self.watchdog = watchdog;
        self
    }

    pub fn with_limits(mut self, limits: StreamLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn on_error(mut self, hook: impl Fn(&SessionHandle, &GatewayError) + Send + Sync + 'static) -> Self {
        self.on_error = Arc::new(hook);
        self
    }

    pub fn on_panic(mut self, hook: impl Fn(&SessionHandle, &str) + Send + Sync + 'static) -> Self {
        self.on_panic = Arc::new(hook);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn watchdog(&self) -> Duration {
        self.watchdog
    }

    fn pipeline(&self) -> Arc<dyn Action> {
        with_wrappers(Arc::new(Sequence::new(self.actions.clone())), &self.wrappers)
    }

    /// Serve one inbound request, resolving with the response the pipeline
    /// produced. For WebSocket sessions this is the upgrade response and the
    /// session keeps running after it is returned.
    pub async fn serve(self: Arc<Self>, request: Request<Body>) -> Response {
        let (session, response_rx) = Session::new(&self.name, request, self.limits);
        let handle = Arc::clone(session.handle());

        let handler = Arc::clone(&self);
        tokio::spawn(async move {
            handler.execute(session).await;
        });

        match response_rx.await {
            Ok(response) => response,
            Err(_) => {
                tracing::warn!(
                    handler = %self.name,
                    request_id = %handle.request_id(),
                    "Session ended without a response"
                );
                with_request_id(error_response(&ErrorReply::server_error()), handle.request_id())
            }
        }
    }

    /// Run the pipeline for `session` to a terminal state.
    pub async fn execute(&self, session: Session) -> Outcome {
        let handle = Arc::clone(session.handle());
        let pipeline = self.pipeline();

        let mut task = tokio::spawn(
            async move { pipeline.run(&session).await }.instrument(handle.span().clone()),
        );

        let outcome = tokio::select! {
            joined = &mut task => match joined {
                Ok(Ok(())) => Outcome::Completed,
                Ok(Err(e)) => Outcome::Errored(e),
                Err(e) if e.is_panic() => Outcome::Panicked(panic_message(e.into_panic())),
                Err(_) => Outcome::Errored(GatewayError::Internal("pipeline task was aborted".to_string())),
            },
            _ = tokio::time::sleep(self.watchdog) => {
                let delivered = handle.outbound().reply_timeout(handle.request_id()).await;
                handle.cancellation().cancel();
                tracing::warn!(
                    parent: handle.span(),
                    watchdog_secs = self.watchdog.as_secs_f64(),
                    delivered,
                    "Session watchdog expired"
                );
                Outcome::TimedOut
            }
        };

        self.finish(&handle, &outcome).await;
        outcome
    }

    async fn finish(&self, handle: &SessionHandle, outcome: &Outcome) {
        let outbound = handle.outbound();
        let request_id = handle.request_id();
        outbound.finish_chunked().await;

        match outcome {
            Outcome::Completed => {
                outbound.respond_if_pending(request_id, Response::new(Body::empty())).await;
            }
            Outcome::Errored(e) => {
                outbound.respond_if_pending(request_id, error_response(&e.to_reply())).await;
                (self.on_error)(handle, e);
            }
            Outcome::Panicked(message) => {
                outbound
                    .respond_if_pending(request_id, error_response(&ErrorReply::server_error()))
                    .await;
                (self.on_panic)(handle, message);
            }
            Outcome::TimedOut => {
                (self.on_error)(handle, &GatewayError::Timeout);
            }
        }

        let elapsed = handle.elapsed();
        tracing::info!(
            parent: handle.span(),
            outcome = outcome.label(),
            latency_ms = elapsed.as_millis() as u64,
            "Session finished"
        );
        metrics::record_session(&self.name, outcome.label(), elapsed);
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .field("wrappers", &self.wrappers.iter().map(|w| w.name()).collect::<Vec<_>>())
            .field("actions", &self.actions.len())
            .field("watchdog", &self.watchdog)
            .finish()
    }
}

/// Request id, error translation, downstream acquisition.
pub fn default_http(name: impl Into<String>, config: &GatewayConfig, dialer: Arc<dyn Dialer>) -> Handler {
    Handler::new(name).configured(config).use_wrappers([
        Arc::new(AssignRequestId) as Arc<dyn Wrapper>,
        Arc::new(ReplyErrors),
        Arc::new(AcquireDownstream::from_config(dialer, &config.downstream)),
    ])
}

/// Request id, WebSocket upgrade, error translation, downstream acquisition.
pub fn default_websocket(
    name: impl Into<String>,
    config: &GatewayConfig,
    dialer: Arc<dyn Dialer>,
) -> Handler {
    Handler::new(name).configured(config).use_wrappers([
        Arc::new(AssignRequestId) as Arc<dyn Wrapper>,
        Arc::new(UpgradeWebSocket::new(config.websocket.close_grace())),
        Arc::new(ReplyErrors),
        Arc::new(AcquireDownstream::from_config(dialer, &config.downstream)),
    ])
}

/// Request id and error translation only.
pub fn http_without_downstream(name: impl Into<String>, config: &GatewayConfig) -> Handler {
    Handler::new(name).configured(config).use_wrappers([
        Arc::new(AssignRequestId) as Arc<dyn Wrapper>,
        Arc::new(ReplyErrors),
    ])
}

fn log_error(handle: &SessionHandle, err: &GatewayError) {
    tracing::error!(
        parent: handle.span(),
        error = %err,
        kind = ?err.kind(),
        "Session failed"
    );
}

fn log_panic(handle: &SessionHandle, message: &str) {
    tracing::error!(parent: handle.span(), panic = %message, "Session panicked");
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
