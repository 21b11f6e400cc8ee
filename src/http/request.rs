//! Inbound request helpers.
//!
//! # Responsibilities
//! - Name the correlation-id header shared by requests, responses and
//!   downstream call metadata
//! - Decode JSON request bodies with a size bound
//!
//! # Design Decisions
//! - A body that fails to decode is a client error (400 / 2400), never a
//!   server error

use axum::body::Body;
use axum::http::HeaderMap;
use serde::de::DeserializeOwned;

use crate::pipeline::{GatewayError, GatewayResult};

/// Correlation-id header, read from requests and echoed on responses.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Largest JSON body an action may read.
pub const MAX_JSON_BODY_BYTES: usize = 1024 * 1024;

/// Non-empty correlation id supplied by the client, if any.
pub fn request_id_from(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(X_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Read the whole body and decode it as JSON.
pub async fn read_json<T: DeserializeOwned>(body: Body) -> GatewayResult<T> {
    let bytes = axum::body::to_bytes(body, MAX_JSON_BODY_BYTES)
        .await
        .map_err(|e| GatewayError::bad_request(format!("invalid request: {}", e)))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| GatewayError::bad_request(format!("invalid request: {}", e)))
}
