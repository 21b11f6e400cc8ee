//! HTTP response encoding.
//!
//! # Responsibilities
//! - Encode success payloads as raw JSON bodies
//! - Encode errors as `{"message": ...}` with the error's status
//! - Echo the session correlation id on every response
//! - Stream chunked bodies for responses produced piecewise

use std::convert::Infallible;

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures_util::Stream;
use serde::{Deserialize, Serialize};

use crate::http::request::X_REQUEST_ID;
use crate::pipeline::{ErrorReply, GatewayError, GatewayResult};

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Body of every HTTP error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpErrorBody {
    pub message: String,
}

/// Response with an explicit content type and a pre-encoded body.
pub fn binary_response(status: StatusCode, content_type: &str, body: Bytes) -> Response {
    body_response(status, content_type, Body::from(body))
}

/// Response whose body is written chunk by chunk as `chunks` yields.
pub fn chunked_response<S>(status: StatusCode, content_type: &str, chunks: S) -> Response
where
    S: Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
{
    body_response(status, content_type, Body::from_stream(chunks))
}

fn body_response(status: StatusCode, content_type: &str, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    if let Ok(value) = HeaderValue::from_str(content_type) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response
}

/// Serialize `data` as the raw JSON body.
pub fn json_response<T: Serialize + ?Sized>(status: StatusCode, data: &T) -> GatewayResult<Response> {
    let body = serde_json::to_vec(data)
        .map_err(|e| GatewayError::Internal(format!("failed to encode response: {}", e)))?;
    Ok(binary_response(status, CONTENT_TYPE_JSON, Bytes::from(body)))
}

pub fn error_response(reply: &ErrorReply) -> Response {
    (
        reply.status,
        Json(HttpErrorBody {
            message: reply.message.clone(),
        }),
    )
        .into_response()
}

/// Attach the correlation id unless the response already carries one.
pub fn with_request_id(mut response: Response, request_id: &str) -> Response {
    if request_id.is_empty() || response.headers().contains_key(X_REQUEST_ID) {
        return response;
    }
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
    response
}
