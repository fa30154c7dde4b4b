/// Broadcast Bus
///
/// Single shared publish point for the live stream. Every connection holds
/// its own `Subscription`, which filters the shared channel down to messages
/// without a target or targeted at that connection.
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::warn;

use super::messages::{ClientId, StreamMessage};

#[derive(Debug)]
pub(crate) enum Envelope {
    Deliver {
        target: Option<ClientId>,
        message: StreamMessage,
    },
    /// Ends every subscription
    Close,
}

fn addressed_to(target: &Option<ClientId>, client_id: ClientId) -> bool {
    target.map_or(true, |t| t == client_id)
}

#[derive(Clone)]
pub struct BroadcastBus {
    sender: broadcast::Sender<Arc<Envelope>>,
    closed: Arc<AtomicBool>,
}

impl BroadcastBus {
    /// `capacity` bounds how far a slow subscriber may lag before it skips messages
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Publish to one client (`Some`) or everyone (`None`).
    ///
    /// Returns the number of live subscriptions the message was handed to;
    /// 0 once the bus is closed.
    pub fn publish(&self, target: Option<ClientId>, message: StreamMessage) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.sender
            .send(Arc::new(Envelope::Deliver { target, message }))
            .unwrap_or(0)
    }

    /// Permanently close the bus. Returns false if it was already closed.
    pub fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self.sender.send(Arc::new(Envelope::Close));
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// New filtered subscription, or `None` when the bus is closed
    pub fn subscribe(&self, client_id: ClientId) -> Option<Subscription> {
        if self.is_closed() {
            return None;
        }
        Some(Subscription {
            client_id,
            inner: BroadcastStream::new(self.sender.subscribe()),
            done: false,
        })
    }
}

/// One client's filtered view of the bus.
///
/// Dropping it only detaches this receiver; the bus and other subscribers are unaffected.
pub struct Subscription {
    client_id: ClientId,
    inner: BroadcastStream<Arc<Envelope>>,
    done: bool,
}

impl Stream for Subscription {
    type Item = StreamMessage;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            match this.inner.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(envelope))) => match envelope.as_ref() {
                    Envelope::Deliver { target, message } => {
                        if addressed_to(target, this.client_id) {
                            return Poll::Ready(Some(message.clone()));
                        }
                    }
                    Envelope::Close => {
                        this.done = true;
                        return Poll::Ready(None);
                    }
                },
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    warn!(
                        client_id = %this.client_id,
                        skipped,
                        "Stream subscriber lagged behind the bus"
                    );
                }
                Poll::Ready(None) => {
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_targeted_message_reaches_only_its_client() {
        let bus = BroadcastBus::new(16);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut sub_a = bus.subscribe(a).unwrap();
        let mut sub_b = bus.subscribe(b).unwrap();

        bus.publish(Some(a), StreamMessage::custom("direct", serde_json::json!(1)));
        bus.publish(None, StreamMessage::Ping);

        assert_eq!(
            sub_a.next().await,
            Some(StreamMessage::custom("direct", serde_json::json!(1)))
        );
        assert_eq!(sub_a.next().await, Some(StreamMessage::Ping));
        // b skips the message addressed to a
        assert_eq!(sub_b.next().await, Some(StreamMessage::Ping));
    }

    #[tokio::test]
    async fn test_dropping_one_subscriber_leaves_others_intact() {
        let bus = BroadcastBus::new(16);
        let sub_a = bus.subscribe(Uuid::new_v4()).unwrap();
        let mut sub_b = bus.subscribe(Uuid::new_v4()).unwrap();
        drop(sub_a);

        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(bus.publish(None, StreamMessage::Ping), 1);
        assert_eq!(sub_b.next().await, Some(StreamMessage::Ping));
        assert!(!bus.is_closed());
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_to_newest() {
        let bus = BroadcastBus::new(2);
        let mut sub = bus.subscribe(Uuid::new_v4()).unwrap();

        for n in 0..3 {
            bus.publish(None, StreamMessage::custom("n", serde_json::json!(n)));
        }

        assert_eq!(
            sub.next().await,
            Some(StreamMessage::custom("n", serde_json::json!(1)))
        );
        assert_eq!(
            sub.next().await,
            Some(StreamMessage::custom("n", serde_json::json!(2)))
        );
    }

    #[tokio::test]
    async fn test_shutdown_is_permanent() {
        let bus = BroadcastBus::new(16);
        let mut sub = bus.subscribe(Uuid::new_v4()).unwrap();

        assert!(bus.shutdown());
        assert!(!bus.shutdown());
        assert!(bus.is_closed());
        assert_eq!(bus.publish(None, StreamMessage::Ping), 0);
        assert!(bus.subscribe(Uuid::new_v4()).is_none());
        assert_eq!(sub.next().await, None);
    }
}
