//! Reusable transport wrappers.
//!
//! Default order, outermost first:
//!
//! ```text
//! AssignRequestId → UpgradeWebSocket (WebSocket only) → ReplyErrors → AcquireDownstream
//! ```
//!
//! Error translation sits inside the upgrade so WebSocket errors travel as
//! envelopes over the live socket, and outside acquisition so dial failures
//! still reach the client.

pub mod downstream;
pub mod reply;
pub mod request_id;
pub mod websocket;

pub use downstream::AcquireDownstream;
pub use reply::ReplyErrors;
pub use request_id::AssignRequestId;
pub use websocket::{UpgradeWebSocket, DEFAULT_CLOSE_GRACE};
