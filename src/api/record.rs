//! `/websocket`: client-streaming upload relayed from WebSocket frames.
//!
//! The client sends binary frames followed by `"EOS"`. Frames are uploaded
//! over one `Record` call; the downstream's single answer comes back as a
//! success envelope.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::GatewayConfig;
use crate::downstream::{ClientStream, Dialer};
use crate::pipeline::{
    default_websocket, Action, GatewayError, GatewayResult, Handler, Session, StateKey,
};
use crate::stream::{relay_to_client_stream, RelaySummary};

pub const RECORD_METHOD: &str = "/hello.StreamService/Record";

/// One `Record` call per downstream connection, in connection order.
pub const RECORD_STREAMS: StateKey<Vec<Arc<dyn ClientStream>>> = StateKey::new("record_streams");
pub const UPLOAD_SUMMARY: StateKey<RelaySummary> = StateKey::new("upload_summary");

/// Success payload of a finished upload.
#[derive(Debug, Serialize)]
pub struct RecordResult {
    pub frames: u64,
    pub bytes: u64,
    pub response: serde_json::Value,
}

pub struct OpenRecordStreams;

#[async_trait]
impl Action for OpenRecordStreams {
    async fn run(&self, sess: &Session) -> GatewayResult<()> {
        let meta = sess.call_meta();
        let mut streams = Vec::with_capacity(sess.downstream_count());
        for connection in sess.downstream_connections() {
            streams.push(connection.client_stream(&meta, RECORD_METHOD).await?);
        }
        tracing::debug!(streams = streams.len(), "Record streams opened");
        sess.set(RECORD_STREAMS, streams);
        Ok(())
    }

    fn name(&self) -> &str {
        "open_record_streams"
    }
}

/// Uploads the client's frames through the first stream.
pub struct UploadFrames;

#[async_trait]
impl Action for UploadFrames {
    async fn run(&self, sess: &Session) -> GatewayResult<()> {
        let stream = first_stream(sess)?;
        let summary = relay_to_client_stream(sess, stream.as_ref()).await?;
        tracing::info!(frames = summary.frames, bytes = summary.bytes, "Upload relayed");
        sess.set(UPLOAD_SUMMARY, summary);
        Ok(())
    }

    fn name(&self) -> &str {
        "upload_frames"
    }
}

pub struct DeliverRecordResult;

#[async_trait]
impl Action for DeliverRecordResult {
    async fn run(&self, sess: &Session) -> GatewayResult<()> {
        let stream = first_stream(sess)?;
        let summary = sess.get(UPLOAD_SUMMARY)?;
        let response = stream.close_and_recv().await?;

        let response = serde_json::from_slice(&response)
            .unwrap_or_else(|_| serde_json::json!({ "bytes": response.len() }));
        sess.reply_json(&RecordResult {
            frames: summary.frames,
            bytes: summary.bytes,
            response,
        })
        .await
    }

    fn name(&self) -> &str {
        "deliver_record_result"
    }
}

fn first_stream(sess: &Session) -> GatewayResult<Arc<dyn ClientStream>> {
    sess.get(RECORD_STREAMS)?
        .into_iter()
        .next()
        .ok_or(GatewayError::NoDownstream(0))
}

pub fn handler(config: &GatewayConfig, dialer: Arc<dyn Dialer>) -> Handler {
    default_websocket("websocket", config, dialer)
        .add(Arc::new(OpenRecordStreams))
        .add(Arc::new(UploadFrames))
        .add(Arc::new(DeliverRecordResult))
}
