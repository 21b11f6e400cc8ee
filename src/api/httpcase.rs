//! `/httpcase`: one unary downstream call answered as HTTP JSON.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use axum::http::StatusCode;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::GatewayConfig;
use crate::downstream::Dialer;
use crate::pipeline::error::CODE_SERVER_ERROR;
use crate::pipeline::{default_http, Action, GatewayError, GatewayResult, Handler, Session};

pub const GREET_METHOD: &str = "/hello.Greeting/Greet";

/// Greeting sent when the client posts an empty body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreetRequest {
    pub saying: String,
    pub person: String,
    pub fruit: String,
    /// Unix seconds.
    pub time: u64,
}

impl Default for GreetRequest {
    fn default() -> Self {
        Self {
            saying: "hello".to_string(),
            person: "Joe".to_string(),
            fruit: "apple".to_string(),
            time: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }
}

/// Forwards the JSON body to the first downstream and replies with its answer.
pub struct CallGreeting;

#[async_trait]
impl Action for CallGreeting {
    async fn run(&self, sess: &Session) -> GatewayResult<()> {
        let body = sess.read_bytes().await?;
        let payload = if body.is_empty() {
            encode(&GreetRequest::default())?
        } else {
            serde_json::from_slice::<serde_json::Value>(&body)
                .map_err(|e| GatewayError::bad_request(format!("invalid request: {}", e)))?;
            body
        };

        let connection = sess.downstream(0)?;
        let response = connection
            .unary(&sess.call_meta(), GREET_METHOD, payload)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, downstream = %connection.target(), "Greeting call failed");
                GatewayError::reply(StatusCode::BAD_GATEWAY, CODE_SERVER_ERROR, "downstream call failed")
            })?;

        sess.reply_json(&decode(&response)).await
    }

    fn name(&self) -> &str {
        "call_greeting"
    }
}

fn encode<T: Serialize>(value: &T) -> GatewayResult<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| GatewayError::Internal(format!("failed to encode greeting: {}", e)))
}

/// Downstream answers are JSON documents; anything else is summarized.
fn decode(response: &[u8]) -> serde_json::Value {
    serde_json::from_slice(response)
        .unwrap_or_else(|_| serde_json::json!({ "bytes": response.len() }))
}

pub fn handler(config: &GatewayConfig, dialer: Arc<dyn Dialer>) -> Handler {
    default_http("httpcase", config, dialer).add(Arc::new(CallGreeting))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downstream::fake::FakeDialer;
    use axum::body::Body;
    use axum::http::Request;
    use axum::response::Response;

    async fn call(body: &'static str, request_id: Option<&str>) -> (Response, Arc<crate::downstream::fake::CallLog>) {
        let dialer = FakeDialer::new();
        let log = Arc::clone(&dialer.log);
        let handler = Arc::new(handler(&GatewayConfig::default(), Arc::new(dialer)));

        let mut request = Request::builder().method("POST").uri("/httpcase");
        if let Some(id) = request_id {
            request = request.header("x-request-id", id);
        }
        let response = handler.serve(request.body(Body::from(body)).unwrap()).await;
        (response, log)
    }

    async fn json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn body_is_forwarded_and_answer_returned_as_raw_json() {
        let (response, log) = call(r#"{"saying":"hi"}"#, Some("abc123")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-request-id"], "abc123");
        assert_eq!(json(response).await, serde_json::json!({ "saying": "hi" }));

        let metas = log.metas.lock();
        assert_eq!(metas[0].request_id.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn empty_body_sends_default_greeting() {
        let (response, _) = call("", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        let body = json(response).await;
        assert_eq!(body["saying"], "hello");
        assert_eq!(body["person"], "Joe");
    }

    #[tokio::test]
    async fn malformed_body_is_a_client_error() {
        let (response, log) = call("{not json", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(log.metas.lock().is_empty());
        // Connections are released even though the action failed.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(log.closed.lock().len(), 1);
    }

    #[test]
    fn non_json_answers_are_summarized() {
        assert_eq!(decode(b"\x00\x01\x02"), serde_json::json!({ "bytes": 3 }));
    }
}
