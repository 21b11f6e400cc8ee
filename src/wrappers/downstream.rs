//! Downstream connection acquisition wrapper.
//!
//! # Design Decisions
//! - Targets are dialed in configured order; the first failure aborts the
//!   session before any business step runs
//! - Connections are released in reverse order of acquisition, exactly once,
//!   on success, error and panic alike

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::config::DownstreamConfig;
use crate::downstream::{Connection, Dialer};
use crate::observability::metrics;
use crate::pipeline::{invoke_guarded, Action, GatewayError, GatewayResult, Session, Wrapper};

pub struct AcquireDownstream {
    dialer: Arc<dyn Dialer>,
    targets: Vec<String>,
    connect_timeout: Duration,
}

impl AcquireDownstream {
    pub fn new(dialer: Arc<dyn Dialer>, targets: Vec<String>, connect_timeout: Duration) -> Self {
        Self {
            dialer,
            targets,
            connect_timeout,
        }
    }

    pub fn from_config(dialer: Arc<dyn Dialer>, config: &DownstreamConfig) -> Self {
        Self::new(dialer, config.targets.clone(), config.connect_timeout())
    }

    async fn dial_all(&self, sess: &Session) -> GatewayResult<Vec<Arc<dyn Connection>>> {
        let mut opened: Vec<Arc<dyn Connection>> = Vec::with_capacity(self.targets.len());

        for target in &self.targets {
            let started = Instant::now();
            let dialed = tokio::select! {
                dialed = self.dialer.dial(target, self.connect_timeout) => dialed,
                _ = sess.cancelled() => {
                    release(&opened).await;
                    return Err(GatewayError::Cancelled);
                }
            };

            match dialed {
                Ok(connection) => {
                    metrics::record_dial(target, "ok", started.elapsed());
                    tracing::debug!(downstream = %target, "Downstream connected");
                    opened.push(connection);
                }
                Err(source) => {
                    metrics::record_dial(target, "error", started.elapsed());
                    tracing::error!(downstream = %target, error = %source, "Failed to dial downstream");
                    release(&opened).await;
                    return Err(GatewayError::Dial {
                        target: target.clone(),
                        source,
                    });
                }
            }
        }

        Ok(opened)
    }
}

#[async_trait]
impl Wrapper for AcquireDownstream {
    async fn wrap(&self, sess: &Session, next: &dyn Action) -> GatewayResult<()> {
        let opened = self.dial_all(sess).await?;
        for connection in &opened {
            sess.push_downstream(Arc::clone(connection));
        }

        let guarded = invoke_guarded(next, sess).await;
        release(&opened).await;
        guarded.resume()
    }

    fn name(&self) -> &str {
        "acquire_downstream"
    }
}

async fn release(connections: &[Arc<dyn Connection>]) {
    for connection in connections.iter().rev() {
        connection.close().await;
        tracing::debug!(downstream = %connection.target(), "Downstream released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downstream::fake::FakeDialer;
    use crate::pipeline::{fn_action, with_wrappers, StateKey};
    use crate::stream::StreamLimits;
    use axum::body::Body;
    use axum::http::Request;
    use futures_util::FutureExt;
    use std::panic::AssertUnwindSafe;

    const COUNT: StateKey<usize> = StateKey::new("downstream_count");

    fn session() -> Session {
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        Session::new("test", request, StreamLimits::default()).0
    }

    fn acquire(dialer: FakeDialer, targets: &[&str]) -> Arc<dyn Wrapper> {
        Arc::new(AcquireDownstream::new(
            Arc::new(dialer),
            targets.iter().map(|t| t.to_string()).collect(),
            Duration::from_secs(1),
        ))
    }

    fn count_connections() -> Arc<dyn Action> {
        fn_action("count", |sess| {
            Box::pin(async move {
                sess.set(COUNT, sess.downstream_count());
                assert_eq!(sess.downstream(0)?.target(), "a:1");
                Ok::<(), GatewayError>(())
            })
        })
    }

    #[tokio::test]
    async fn connections_are_stored_in_order_and_released_in_reverse() {
        let dialer = FakeDialer::new();
        let log = Arc::clone(&dialer.log);
        let sess = session();

        let pipeline = with_wrappers(count_connections(), &[acquire(dialer, &["a:1", "b:2"])]);
        pipeline.run(&sess).await.unwrap();

        assert_eq!(sess.get(COUNT).unwrap(), 2);
        assert_eq!(*log.dialed.lock(), vec!["a:1", "b:2"]);
        assert_eq!(*log.closed.lock(), vec!["b:2", "a:1"]);
    }

    #[tokio::test]
    async fn repeated_target_gets_one_connection_per_entry() {
        let dialer = FakeDialer::new();
        let log = Arc::clone(&dialer.log);
        let sess = session();

        let pipeline = with_wrappers(count_connections(), &[acquire(dialer, &["a:1", "a:1", "a:1"])]);
        pipeline.run(&sess).await.unwrap();

        assert_eq!(sess.get(COUNT).unwrap(), 3);
        assert_eq!(log.dialed.lock().len(), 3);
        assert_eq!(log.closed.lock().len(), 3);
    }

    #[tokio::test]
    async fn dial_failure_releases_opened_and_stores_nothing() {
        let dialer = FakeDialer::new().unreachable("b:2");
        let log = Arc::clone(&dialer.log);
        let sess = session();

        let pipeline = with_wrappers(count_connections(), &[acquire(dialer, &["a:1", "b:2", "c:3"])]);
        let err = pipeline.run(&sess).await.unwrap_err();

        assert!(matches!(err, GatewayError::Dial { ref target, .. } if target == "b:2"));
        assert_eq!(sess.downstream_count(), 0);
        assert!(!sess.contains(COUNT));
        assert_eq!(*log.dialed.lock(), vec!["a:1"]);
        assert_eq!(*log.closed.lock(), vec!["a:1"]);
    }

    #[tokio::test]
    async fn connections_are_released_once_on_error_and_panic() {
        let dialer = FakeDialer::new();
        let log = Arc::clone(&dialer.log);
        let wrapper = acquire(dialer, &["a:1"]);

        let failing = fn_action("failing", |_| {
            Box::pin(async { Err::<(), _>(GatewayError::Internal("boom".into())) })
        });
        let sess = session();
        assert!(with_wrappers(failing, &[Arc::clone(&wrapper)]).run(&sess).await.is_err());
        assert_eq!(log.closed.lock().len(), 1);

        let panicking = fn_action("panicking", |_| {
            Box::pin(async {
                let explode = true;
                if explode {
                    panic!("boom");
                }
                Ok::<(), GatewayError>(())
            })
        });
        let sess = session();
        let pipeline = with_wrappers(panicking, &[wrapper]);
        let outcome = AssertUnwindSafe(pipeline.run(&sess)).catch_unwind().await;
        assert!(outcome.is_err());
        assert_eq!(log.closed.lock().len(), 2);
    }
}
