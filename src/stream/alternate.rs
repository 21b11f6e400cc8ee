//! Alternating bidirectional exchange over a duplex stream.
//!
//! Two loops share one duplex stream: the sender pulls from a frame source
//! and calls `send`; the receiver calls `recv` and hands each message to a
//! consumer. They take turns so the stream never sees `send` and `recv`
//! in flight at the same time.
//!
//! # Data Flow
//! ```text
//!          ready (1 credit per consumed message)
//!   ┌──────────────────────────────────────────────┐
//!   ▼                                              │
//! sender: credit → produce → send ──sent──▶ receiver: recv → consume
//!                     │
//!                   None → close_send, receiver drains to end-of-stream
//! ```
//!
//! # Design Decisions
//! - Both loops are polled on the caller's task; nothing is spawned, so the
//!   stream and the source can be borrowed
//! - Downstream end-of-stream or an error from either loop ends the whole
//!   exchange, and the error is returned exactly once

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::downstream::DuplexStream;
use crate::pipeline::GatewayResult;
use crate::stream::frame::FrameSource;

/// Which side of the exchange moves first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirstTurn {
    /// The client speaks first; the downstream answers each message.
    #[default]
    Send,
    /// The downstream speaks first (a greeting, a prompt).
    Receive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExchangeSummary {
    pub sent: u64,
    pub received: u64,
}

pub async fn alternate<S, C, Fut>(
    stream: &dyn DuplexStream,
    first: FirstTurn,
    source: &mut S,
    mut consume: C,
) -> GatewayResult<ExchangeSummary>
where
    S: FrameSource + ?Sized,
    C: FnMut(Bytes) -> Fut,
    Fut: Future<Output = GatewayResult<()>>,
{
    let (ready_tx, mut ready_rx) = mpsc::channel::<()>(1);
    let (sent_tx, mut sent_rx) = mpsc::channel::<()>(1);
    if first == FirstTurn::Send {
        // Capacity is 1 and the channel is fresh.
        let _ = ready_tx.try_send(());
    }

    let sent = AtomicU64::new(0);
    let received = AtomicU64::new(0);

    let sender = {
        let sent = &sent;
        async move {
            while ready_rx.recv().await.is_some() {
                match source.next_frame().await? {
                    Some(frame) => {
                        stream.send(frame).await?;
                        sent.fetch_add(1, Ordering::Relaxed);
                        if sent_tx.send(()).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        stream.close_send().await?;
                        break;
                    }
                }
            }
            // Dropping `sent_tx` releases the receiver from turn-taking.
            drop(sent_tx);
            GatewayResult::Ok(())
        }
    };

    let receiver = {
        let received = &received;
        async move {
            let mut sender_open = true;
            let mut turn_owed = first == FirstTurn::Send;
            loop {
                if sender_open && turn_owed && sent_rx.recv().await.is_none() {
                    sender_open = false;
                }
                turn_owed = true;

                let Some(message) = stream.recv().await? else {
                    return GatewayResult::Ok(());
                };
                consume(message).await?;
                received.fetch_add(1, Ordering::Relaxed);
                // The sender may already be gone; the drain continues without it.
                let _ = ready_tx.send(()).await;
            }
        }
    };

    tokio::pin!(sender);
    tokio::pin!(receiver);

    let mut sender_done = false;
    loop {
        tokio::select! {
            result = &mut sender, if !sender_done => {
                result?;
                sender_done = true;
            }
            result = &mut receiver => {
                result?;
                break;
            }
        }
    }

    Ok(ExchangeSummary {
        sent: sent.load(Ordering::Relaxed),
        received: received.load(Ordering::Relaxed),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downstream::fake::EchoDuplex;
    use crate::pipeline::GatewayError;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    fn frames(items: &[&'static str]) -> mpsc::Receiver<Bytes> {
        let (tx, rx) = mpsc::channel(items.len().max(1));
        for item in items {
            tx.try_send(Bytes::from_static(item.as_bytes())).unwrap();
        }
        rx
    }

    #[tokio::test]
    async fn send_first_echoes_every_message_in_turn() {
        let stream = EchoDuplex::new();
        let mut source = frames(&["a", "b", "c"]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let summary = alternate(&stream, FirstTurn::Send, &mut source, |message| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(message);
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(summary, ExchangeSummary { sent: 3, received: 3 });
        assert_eq!(*seen.lock(), vec!["a", "b", "c"]);
        assert!(!stream.overlapped());
        assert!(stream.send_closed());
    }

    #[tokio::test]
    async fn receive_first_starts_with_downstream_greeting() {
        let stream = EchoDuplex::with_greeting(Bytes::from_static(b"hello"));
        let mut source = frames(&["x"]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let summary = alternate(&stream, FirstTurn::Receive, &mut source, |message| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(message);
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(summary, ExchangeSummary { sent: 1, received: 2 });
        assert_eq!(*seen.lock(), vec!["hello", "x"]);
        assert!(!stream.overlapped());
    }

    #[tokio::test]
    async fn consumer_error_ends_exchange() {
        let stream = EchoDuplex::new();
        let mut source = frames(&["a", "b"]);

        let result = alternate(&stream, FirstTurn::Send, &mut source, |_| async {
            Err(GatewayError::ClientStream("client went away".into()))
        })
        .await;

        assert!(matches!(result, Err(GatewayError::ClientStream(_))));
    }

    #[tokio::test]
    async fn downstream_end_of_stream_ends_exchange() {
        let stream = EchoDuplex::new();
        stream.finish();
        // The source never runs dry; only the downstream can end this exchange.
        let (feed, mut source) = mpsc::channel(1);
        feed.try_send(Bytes::from_static(b"only")).unwrap();

        let summary = tokio::time::timeout(
            Duration::from_secs(1),
            alternate(&stream, FirstTurn::Send, &mut source, |_| async { Ok(()) }),
        )
        .await
        .expect("exchange should end once the downstream finishes")
        .unwrap();

        assert_eq!(summary, ExchangeSummary { sent: 1, received: 0 });
        drop(feed);
    }
}
