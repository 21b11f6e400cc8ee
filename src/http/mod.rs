//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum router, one path per Handler)
//!     → Handler pipeline (crate::pipeline)
//!         request.rs   correlation id, JSON bodies
//!         response.rs  raw JSON results, {"message"} errors
//!         websocket.rs success / error envelopes
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use request::X_REQUEST_ID;
pub use server::GatewayServer;
