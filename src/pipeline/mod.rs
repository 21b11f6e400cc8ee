//! Request-processing pipeline.
//!
//! # Data Flow
//! ```text
//! inbound request
//!     → Handler::serve                      (handler.rs)
//!     → Session::new                        (session.rs)
//!     → spawn: with_wrappers(Sequence(actions), wrappers).run(&session)
//!     → replies through the outbound channel (outbound.rs)
//!     → terminal Outcome: hooks, latency log, metrics
//! ```
//!
//! # Design Decisions
//! - Wrappers and actions are trait objects so any concern can be slotted in
//!   without the others knowing about it
//! - All failures are `GatewayError` values; translation to client replies is
//!   an exhaustive match in `error.rs`

pub mod action;
pub mod error;
pub mod handler;
pub mod outbound;
pub mod session;

pub use action::{
    fn_action, fn_wrapper, invoke_guarded, with_wrappers, Action, ActionExt, Guarded, Parallel,
    Sequence, StepFuture, Wrapper,
};
pub use error::{ErrorKind, ErrorReply, GatewayError, GatewayResult};
pub use handler::{default_http, default_websocket, http_without_downstream, Handler, Outcome};
pub use outbound::{Outbound, TransportState};
pub use session::{Session, SessionHandle, StateKey, WsReader};
