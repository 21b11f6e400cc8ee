//! Streaming bridge between a client WebSocket and downstream RPC streams.
//!
//! # Data Flow
//! ```text
//! client ──binary frames──▶ frame.rs (sentinel, size limit)
//!                              │
//!                              ├─▶ relay.rs      client-streaming upload
//!                              └─▶ alternate.rs  turn-taking duplex exchange
//! ```
//!
//! # Design Decisions
//! - `"EOS"` is the only in-band control frame; everything else is data
//! - Frames are opaque bytes; encoding belongs to the actions

pub mod alternate;
pub mod frame;
pub mod relay;

pub use alternate::{alternate, ExchangeSummary, FirstTurn};
pub use frame::{
    is_end_of_stream, FrameSource, StreamLimits, DEFAULT_MAX_FRAME_BYTES, END_OF_STREAM,
};
pub use relay::{
    bridge_duplex, relay_frames, relay_to_client_stream, stream_foreach, Relay, RelaySummary,
};
