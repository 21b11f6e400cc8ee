//! Gateway error taxonomy.
//!
//! Every failure a pipeline can produce is a `GatewayError` variant. The
//! error-translation wrapper never inspects error values dynamically; it asks
//! the error for its [`ErrorKind`] and its [`ErrorReply`], both of which are
//! exhaustive matches over the variants.

use axum::http::StatusCode;
use thiserror::Error;

use crate::downstream::DownstreamError;

/// WebSocket error code for client-caused failures.
pub const CODE_CLIENT_ERROR: u32 = 2400;
/// WebSocket error code for server-side failures.
pub const CODE_SERVER_ERROR: u32 = 2500;

/// Message used for every error that is not explicitly client-facing.
pub const GENERIC_SERVER_MESSAGE: &str = "internal server error";
/// Message delivered when the session watchdog fires.
pub const TIMEOUT_MESSAGE: &str = "Session timeout";

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Coarse classification of a [`GatewayError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Explicit application reply (status, code and message chosen by an action).
    Reply,
    /// Upgrade, dial or response-channel failures. Fatal to the session.
    TransportSetup,
    /// Oversized or malformed client input. Reported as a client error.
    Protocol,
    /// Downstream RPC failure.
    Downstream,
    /// Watchdog expiry or the cancellation that follows it.
    Timeout,
    /// Programming or state errors inside the gateway.
    Internal,
}

/// Transport-neutral description of an error response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReply {
    pub status: StatusCode,
    pub code: u32,
    pub message: String,
}

impl ErrorReply {
    pub fn server_error() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: CODE_SERVER_ERROR,
            message: GENERIC_SERVER_MESSAGE.to_string(),
        }
    }

    pub fn timeout() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: CODE_SERVER_ERROR,
            message: TIMEOUT_MESSAGE.to_string(),
        }
    }

    fn client_error(message: String) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: CODE_CLIENT_ERROR,
            message,
        }
    }
}

/// Errors produced by actions, wrappers and the handler.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A structured error the action wants delivered verbatim.
    #[error("{message} (status {status}, code {code})")]
    Reply {
        status: StatusCode,
        code: u32,
        message: String,
    },

    #[error("websocket upgrade failed: {0}")]
    Upgrade(String),

    #[error("failed to dial downstream '{target}': {source}")]
    Dial {
        target: String,
        #[source]
        source: DownstreamError,
    },

    #[error("frame of {actual} bytes exceeds the maximum of {max} bytes")]
    FrameTooLarge { actual: usize, max: usize },

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("client stream failed: {0}")]
    ClientStream(String),

    #[error(transparent)]
    Downstream(#[from] DownstreamError),

    #[error("session state '{0}' is not set")]
    MissingState(&'static str),

    #[error("no downstream connection at index {0}")]
    NoDownstream(usize),

    #[error("response channel unavailable: {0}")]
    Outbound(&'static str),

    #[error("session timeout")]
    Timeout,

    #[error("session cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Structured error with an explicit HTTP status and WebSocket code.
    pub fn reply(status: StatusCode, code: u32, message: impl Into<String>) -> Self {
        Self::Reply {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::reply(StatusCode::BAD_REQUEST, CODE_CLIENT_ERROR, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::reply(StatusCode::INTERNAL_SERVER_ERROR, CODE_SERVER_ERROR, message)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Reply { .. } => ErrorKind::Reply,
            Self::Upgrade(_) | Self::Dial { .. } | Self::Outbound(_) => ErrorKind::TransportSetup,
            Self::FrameTooLarge { .. } | Self::Malformed(_) | Self::ClientStream(_) => {
                ErrorKind::Protocol
            }
            Self::Downstream(_) => ErrorKind::Downstream,
            Self::Timeout | Self::Cancelled => ErrorKind::Timeout,
            Self::MissingState(_) | Self::NoDownstream(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The response a client should see for this error.
    pub fn to_reply(&self) -> ErrorReply {
        match self {
            Self::Reply {
                status,
                code,
                message,
            } => ErrorReply {
                status: *status,
                code: *code,
                message: message.clone(),
            },
            Self::FrameTooLarge { .. } | Self::Malformed(_) | Self::ClientStream(_) => {
                ErrorReply::client_error(self.to_string())
            }
            Self::Timeout | Self::Cancelled => ErrorReply::timeout(),
            Self::Upgrade(_)
            | Self::Dial { .. }
            | Self::Outbound(_)
            | Self::Downstream(_)
            | Self::MissingState(_)
            | Self::NoDownstream(_)
            | Self::Internal(_) => ErrorReply::server_error(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_reply_is_passed_through() {
        let err = GatewayError::reply(StatusCode::NOT_FOUND, 2404, "no such stream");
        assert_eq!(err.kind(), ErrorKind::Reply);
        let reply = err.to_reply();
        assert_eq!(reply.status, StatusCode::NOT_FOUND);
        assert_eq!(reply.code, 2404);
        assert_eq!(reply.message, "no such stream");
    }

    #[test]
    fn protocol_violation_is_a_client_error() {
        let err = GatewayError::FrameTooLarge { actual: 11, max: 10 };
        assert_eq!(err.kind(), ErrorKind::Protocol);
        let reply = err.to_reply();
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.code, CODE_CLIENT_ERROR);
        assert!(reply.message.contains("11 bytes"));
    }

    #[test]
    fn unrecognized_errors_are_generic() {
        let err = GatewayError::Dial {
            target: "10.0.0.1:1".into(),
            source: DownstreamError::Closed {
                target: "10.0.0.1:1".into(),
            },
        };
        assert_eq!(err.kind(), ErrorKind::TransportSetup);
        assert_eq!(err.to_reply(), ErrorReply::server_error());

        let err = GatewayError::MissingState("record_streams");
        assert_eq!(err.to_reply().message, GENERIC_SERVER_MESSAGE);
    }

    #[test]
    fn timeout_replies_with_timeout_message() {
        assert_eq!(GatewayError::Timeout.to_reply(), ErrorReply::timeout());
        assert_eq!(GatewayError::Cancelled.kind(), ErrorKind::Timeout);
    }
}
