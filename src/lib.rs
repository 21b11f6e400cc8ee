//! HTTP/WebSocket to RPC gateway library.

pub mod api;
pub mod config;
pub mod downstream;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod stream;
pub mod wrappers;

pub use config::GatewayConfig;
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
pub use pipeline::{Action, GatewayError, GatewayResult, Handler, Session, Wrapper};
