//! Error translation wrapper.

use async_trait::async_trait;

use crate::pipeline::{Action, ErrorKind, GatewayResult, Session, Wrapper};

/// Turns an inner error into a client reply and reports success.
///
/// Structured replies keep their status, code and message. Protocol
/// violations become client errors carrying the violation text. Everything
/// else becomes the generic server error.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplyErrors;

#[async_trait]
impl Wrapper for ReplyErrors {
    async fn wrap(&self, sess: &Session, next: &dyn Action) -> GatewayResult<()> {
        let Err(err) = next.run(sess).await else {
            return Ok(());
        };

        let reply = err.to_reply();
        match err.kind() {
            ErrorKind::Reply | ErrorKind::Protocol => {
                tracing::warn!(error = %err, status = %reply.status, code = reply.code, "Request rejected");
            }
            ErrorKind::Timeout => {
                tracing::warn!(error = %err, "Session stopped by watchdog");
            }
            ErrorKind::TransportSetup | ErrorKind::Downstream | ErrorKind::Internal => {
                tracing::error!(error = %err, kind = ?err.kind(), "Request failed");
            }
        }

        if let Err(send_err) = sess.reply_error(&reply).await {
            tracing::warn!(error = %send_err, "Could not deliver error reply");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "reply_errors"
    }
}
