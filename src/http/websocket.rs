//! WebSocket envelope encoding.
//!
//! # Wire Format
//! ```text
//! {"type":"success","request_id":"<id>","data":<payload>}
//! {"type":"error","request_id":"<id>","data":{"code":2500,"message":"..."}}
//! ```
//!
//! Envelopes are sent as text frames. Client payload frames are binary.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};

use crate::pipeline::{ErrorReply, GatewayError, GatewayResult};

/// Discriminant of a response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeType {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsEnvelope<D> {
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    pub request_id: String,
    pub data: D,
}

/// Payload of an error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsErrorBody {
    pub code: u32,
    pub message: String,
}

pub fn success_message<T: Serialize + ?Sized>(request_id: &str, data: &T) -> GatewayResult<Message> {
    encode(&WsEnvelope {
        kind: EnvelopeType::Success,
        request_id: request_id.to_string(),
        data,
    })
}

pub fn error_message(request_id: &str, reply: &ErrorReply) -> GatewayResult<Message> {
    encode(&WsEnvelope {
        kind: EnvelopeType::Error,
        request_id: request_id.to_string(),
        data: WsErrorBody {
            code: reply.code,
            message: reply.message.clone(),
        },
    })
}

fn encode<D: Serialize>(envelope: &WsEnvelope<D>) -> GatewayResult<Message> {
    let text = serde_json::to_string(envelope)
        .map_err(|e| GatewayError::Internal(format!("failed to encode envelope: {}", e)))?;
    Ok(Message::Text(text.into()))
}
