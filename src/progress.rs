//! Per-token progress broadcast streams (spec.md §4.2 "Progress", §4.13).
//!
//! A stream exists only while its originating request is in flight: opened
//! on the first `on_progress` call for a token, closed when the request's
//! response arrives. Late notifications for a closed or unknown token are
//! dropped silently — this is a non-buffering multicast, not a queue.

use std::pin::Pin;
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::Stream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

use crate::protocol::ProgressToken;

/// One `notifications/progress` payload, already stripped of its token
/// (the token is the subscription key, not part of the delivered event).
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub progress: f64,
    pub total: Option<f64>,
    pub message: Option<String>,
}

/// Channel capacity per token. Progress events are transient status, not a
/// durable log — a slow subscriber drops the oldest rather than stalling
/// the notification sender, same tradeoff `tokio::sync::broadcast` makes.
const CHANNEL_CAPACITY: usize = 64;

/// A subscriber's view of one token's progress notifications. Wraps the
/// underlying `broadcast::Receiver` in a [`futures::Stream`] per spec.md
/// §4.13's "stream getter" contract, silently skipping a `Lagged` error
/// (the subscriber fell behind `CHANNEL_CAPACITY` events) rather than
/// surfacing it — a dropped status update is harmless, unlike a dropped
/// response.
pub struct ProgressStream {
    inner: BroadcastStream<ProgressEvent>,
}

impl Stream for ProgressStream {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => return Poll::Ready(Some(event)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(_)))) => continue,
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct ProgressRegistry {
    streams: DashMap<ProgressToken, broadcast::Sender<ProgressEvent>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or join) the progress stream for `token`.
    pub fn open(&self, token: ProgressToken) -> ProgressStream {
        let receiver = self
            .streams
            .entry(token)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        ProgressStream { inner: BroadcastStream::new(receiver) }
    }

    /// Deliver an inbound progress notification. A token with no open
    /// stream (never subscribed, or already closed) is dropped silently.
    pub fn publish(&self, token: &ProgressToken, event: ProgressEvent) {
        if let Some(sender) = self.streams.get(token) {
            let _ = sender.send(event);
        }
    }

    /// Close the stream for `token`: dropping the sender ends every
    /// subscriber's stream, and any progress notification that arrives
    /// afterward finds no entry and is dropped by `publish`.
    pub fn close(&self, token: &ProgressToken) {
        self.streams.remove(token);
    }

    /// Close every open stream (peer shutdown).
    pub fn close_all(&self) {
        self.streams.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt as _;

    #[tokio::test]
    async fn late_event_after_close_is_not_delivered() {
        let registry = ProgressRegistry::new();
        let token = ProgressToken::Number(1);
        let mut stream = registry.open(token.clone());
        registry.publish(
            &token,
            ProgressEvent {
                progress: 50.0,
                total: None,
                message: None,
            },
        );
        assert_eq!(stream.next().await.unwrap().progress, 50.0);
        registry.close(&token);
        registry.publish(
            &token,
            ProgressEvent {
                progress: 100.0,
                total: None,
                message: None,
            },
        );
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn publish_to_unknown_token_does_not_panic() {
        let registry = ProgressRegistry::new();
        registry.publish(
            &ProgressToken::Number(42),
            ProgressEvent {
                progress: 1.0,
                total: None,
                message: None,
            },
        );
    }
}
