//! Actions, wrappers and their composition.
//!
//! # Data Flow
//! ```text
//! with_wrappers(Sequence[a, b], [w1, w2])
//!
//!   w1.wrap ──▶ w2.wrap ──▶ a.run ──▶ b.run
//!      ▲           ▲                    │
//!      └───────────┴──── result ────────┘
//! ```
//!
//! # Design Decisions
//! - Steps borrow the session (`&Session`). `Parallel` clones the session
//!   handle into one task per action; its mutable parts lock themselves
//! - No implicit retries or recovery: errors flow back outward unchanged
//! - Wrappers that must tear down on panic call [`invoke_guarded`], tear
//!   down, then resume the unwind so the handler still observes it

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::task::JoinSet;
use tracing::{Instrument, Span};

use crate::pipeline::error::{GatewayError, GatewayResult};
use crate::pipeline::session::Session;

/// A named unit of work over a session.
#[async_trait]
pub trait Action: Send + Sync {
    async fn run(&self, sess: &Session) -> GatewayResult<()>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Setup and teardown around an inner action.
///
/// Implementations call `next.run(sess)` at most once and release whatever
/// they acquired on every exit path.
#[async_trait]
pub trait Wrapper: Send + Sync {
    async fn wrap(&self, sess: &Session, next: &dyn Action) -> GatewayResult<()>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Future returned by closure-based steps.
pub type StepFuture<'a> = BoxFuture<'a, GatewayResult<()>>;

/// Runs actions in order, stopping at the first error.
pub struct Sequence {
    actions: Vec<Arc<dyn Action>>,
}

impl Sequence {
    pub fn new(actions: Vec<Arc<dyn Action>>) -> Self {
        Self { actions }
    }
}

#[async_trait]
impl Action for Sequence {
    async fn run(&self, sess: &Session) -> GatewayResult<()> {
        for action in &self.actions {
            action.run(sess).await?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "sequence"
    }
}

/// Runs actions concurrently against the same session, one task each.
///
/// Waits for every action, then returns the first error in completion order.
/// A panicking action does not cut its siblings short: the panic resumes
/// once all of them have finished, and takes precedence over errors.
pub struct Parallel {
    actions: Vec<Arc<dyn Action>>,
}

impl Parallel {
    pub fn new(actions: Vec<Arc<dyn Action>>) -> Self {
        Self { actions }
    }
}

#[async_trait]
impl Action for Parallel {
    async fn run(&self, sess: &Session) -> GatewayResult<()> {
        let mut tasks = JoinSet::new();
        for action in &self.actions {
            let action = Arc::clone(action);
            let sess = sess.clone();
            tasks.spawn(async move { action.run(&sess).await }.instrument(Span::current()));
        }

        let mut first_error = None;
        let mut first_panic = None;
        while let Some(joined) = tasks.join_next().await {
            let err = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(e) if e.is_panic() => {
                    first_panic.get_or_insert(e.into_panic());
                    continue;
                }
                Err(e) => GatewayError::Internal(format!("parallel action did not finish: {}", e)),
            };
            if first_error.is_none() {
                first_error = Some(err);
            } else {
                tracing::debug!(error = %err, "Additional parallel action failed");
            }
        }

        if let Some(payload) = first_panic {
            std::panic::resume_unwind(payload);
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "parallel"
    }
}

struct Wrapped {
    wrapper: Arc<dyn Wrapper>,
    inner: Arc<dyn Action>,
}

#[async_trait]
impl Action for Wrapped {
    async fn run(&self, sess: &Session) -> GatewayResult<()> {
        self.wrapper.wrap(sess, self.inner.as_ref()).await
    }

    fn name(&self) -> &str {
        self.wrapper.name()
    }
}

/// Nest `action` inside `wrappers`, the first wrapper outermost.
pub fn with_wrappers(action: Arc<dyn Action>, wrappers: &[Arc<dyn Wrapper>]) -> Arc<dyn Action> {
    wrappers.iter().rev().fold(action, |inner, wrapper| {
        Arc::new(Wrapped {
            wrapper: Arc::clone(wrapper),
            inner,
        })
    })
}

pub trait ActionExt: Action + Sized + 'static {
    fn with_wrappers(self, wrappers: &[Arc<dyn Wrapper>]) -> Arc<dyn Action> {
        with_wrappers(Arc::new(self), wrappers)
    }
}

impl<A: Action + 'static> ActionExt for A {}

struct FnAction<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> Action for FnAction<F>
where
    F: for<'s> Fn(&'s Session) -> StepFuture<'s> + Send + Sync,
{
    async fn run(&self, sess: &Session) -> GatewayResult<()> {
        (self.f)(sess).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Action from a closure returning a boxed future.
pub fn fn_action<F>(name: impl Into<String>, f: F) -> Arc<dyn Action>
where
    F: for<'s> Fn(&'s Session) -> StepFuture<'s> + Send + Sync + 'static,
{
    Arc::new(FnAction {
        name: name.into(),
        f,
    })
}

struct FnWrapper<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F> Wrapper for FnWrapper<F>
where
    F: for<'s> Fn(&'s Session, &'s dyn Action) -> StepFuture<'s> + Send + Sync,
{
    async fn wrap(&self, sess: &Session, next: &dyn Action) -> GatewayResult<()> {
        (self.f)(sess, next).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Wrapper from a closure receiving the session and the inner action.
pub fn fn_wrapper<F>(name: impl Into<String>, f: F) -> Arc<dyn Wrapper>
where
    F: for<'s> Fn(&'s Session, &'s dyn Action) -> StepFuture<'s> + Send + Sync + 'static,
{
    Arc::new(FnWrapper {
        name: name.into(),
        f,
    })
}

/// Outcome of an inner step run under [`invoke_guarded`].
pub struct Guarded(Result<GatewayResult<()>, Box<dyn Any + Send>>);

impl Guarded {
    pub fn panicked(&self) -> bool {
        self.0.is_err()
    }

    /// The step's result, or continue the captured unwind.
    pub fn resume(self) -> GatewayResult<()> {
        match self.0 {
            Ok(result) => result,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }
}

/// Run `next`, capturing a panic so the caller can release resources first.
pub async fn invoke_guarded(next: &dyn Action, sess: &Session) -> Guarded {
    Guarded(AssertUnwindSafe(next.run(sess)).catch_unwind().await)
}
