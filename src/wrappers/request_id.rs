//! Request identity wrapper.

use async_trait::async_trait;
use uuid::Uuid;

use crate::http::request::request_id_from;
use crate::pipeline::{Action, GatewayResult, Session, Wrapper};

/// Assigns the session correlation id: the client's `X-Request-ID` when
/// present, otherwise a fresh UUID v4.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssignRequestId;

#[async_trait]
impl Wrapper for AssignRequestId {
    async fn wrap(&self, sess: &Session, next: &dyn Action) -> GatewayResult<()> {
        if sess.request_id().is_empty() {
            let id = request_id_from(sess.headers())
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            sess.set_request_id(id)?;
        }

        tracing::debug!(
            method = %sess.method(),
            path = %sess.uri().path(),
            "Session started"
        );

        next.run(sess).await
    }

    fn name(&self) -> &str {
        "assign_request_id"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{fn_action, with_wrappers, GatewayError, StateKey};
    use crate::stream::StreamLimits;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;

    const SEEN: StateKey<String> = StateKey::new("seen_request_id");

    fn capture() -> Arc<dyn Action> {
        fn_action("capture", |sess| {
            Box::pin(async move {
                sess.set(SEEN, sess.request_id().to_string());
                Ok::<(), GatewayError>(())
            })
        })
    }

    async fn run(request: Request<Body>) -> String {
        let (sess, _rx) = Session::new("test", request, StreamLimits::default());
        let pipeline = with_wrappers(capture(), &[Arc::new(AssignRequestId) as Arc<dyn Wrapper>]);
        pipeline.run(&sess).await.unwrap();
        sess.get(SEEN).unwrap()
    }

    #[tokio::test]
    async fn client_request_id_is_kept() {
        let request = Request::builder()
            .uri("/")
            .header("X-Request-ID", "abc123")
            .body(Body::empty())
            .unwrap();
        assert_eq!(run(request).await, "abc123");
    }

    #[tokio::test]
    async fn missing_request_id_is_generated() {
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let id = run(request).await;
        assert!(Uuid::parse_str(&id).is_ok(), "not a uuid: {}", id);
    }

    #[tokio::test]
    async fn generated_ids_are_unique() {
        let a = run(Request::builder().uri("/").body(Body::empty()).unwrap()).await;
        let b = run(Request::builder().uri("/").body(Body::empty()).unwrap()).await;
        assert_ne!(a, b);
    }
}
