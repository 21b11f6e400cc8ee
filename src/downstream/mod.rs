//! Downstream RPC boundary.
//!
//! # Data Flow
//! ```text
//! AcquireDownstream wrapper
//!     → Dialer::dial(target, connect timeout)       (types.rs)
//!     → Arc<dyn Connection> stored on the Session
//!     → actions open calls: unary / client_stream / duplex
//!     → Connection::close() on every exit path
//! ```
//!
//! # Design Decisions
//! - The pipeline only sees the traits in `types.rs`; `grpc.rs` is the one
//!   concrete transport and can be swapped for a pooled or fake dialer
//! - Payloads are `Bytes`; message schemas belong to the actions

#[cfg(test)]
pub(crate) mod fake;
pub mod grpc;
pub mod types;

pub use grpc::{GrpcDialer, RawCodec};
pub use types::{CallMeta, ClientStream, Connection, Dialer, DownstreamError, DuplexStream};
