//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::stream::{StreamLimits, DEFAULT_MAX_FRAME_BYTES};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Inbound listener.
    pub listener: ListenerConfig,

    /// Downstream RPC targets and dial settings.
    pub downstream: DownstreamConfig,

    /// Per-session limits.
    pub session: SessionConfig,

    /// WebSocket teardown.
    pub websocket: WebSocketConfig,

    /// Client frame limits.
    pub stream: StreamConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8585").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8585".to_string(),
        }
    }
}

/// Downstream RPC configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DownstreamConfig {
    /// Addresses dialed for every session, in order (e.g., "127.0.0.1:8686").
    pub targets: Vec<String>,

    /// Connect timeout per target in seconds.
    pub connect_timeout_secs: u64,

    /// Largest message encoded or decoded on a downstream call.
    pub max_message_bytes: usize,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            targets: vec!["127.0.0.1:8686".to_string()],
            connect_timeout_secs: 10,
            max_message_bytes: 16 * 1024 * 1024,
        }
    }
}

impl DownstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Wall-clock bound for one session in seconds.
    pub watchdog_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { watchdog_secs: 600 }
    }
}

impl SessionConfig {
    pub fn watchdog(&self) -> Duration {
        Duration::from_secs(self.watchdog_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Delay between sending the close frame and closing the socket.
    pub close_grace_ms: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            close_grace_ms: 5_000,
        }
    }
}

impl WebSocketConfig {
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    /// Largest accepted client frame in bytes.
    pub max_frame_bytes: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl StreamConfig {
    pub fn limits(&self) -> StreamLimits {
        StreamLimits {
            max_frame_bytes: self.max_frame_bytes,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
