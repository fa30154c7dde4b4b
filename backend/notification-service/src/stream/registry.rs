/// Connection Registry
///
/// Tracks live streaming clients and routes messages to them.
/// Supports:
/// - Per-connection lazy message streams with a `connected` greeting
/// - Periodic keepalive pings merged into each stream
/// - Targeted and broadcast delivery through the shared bus
/// - Exactly-once deregistration when a stream is dropped or closed
/// - Permanent shutdown
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::bus::{BroadcastBus, Subscription};
use super::messages::{ClientId, StreamFrame, StreamMessage};
use crate::error::{AppError, Result};
use crate::metrics;

/// Default keepalive period for idle streams
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(25);

/// Default bus capacity (messages a slow client may fall behind)
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

#[derive(Debug)]
struct ClientEntry {
    connected_at: DateTime<Utc>,
    /// Dropped with the entry; ends the session stream independently of the bus
    _terminate: oneshot::Sender<()>,
}

struct RegistryInner {
    clients: DashMap<ClientId, ClientEntry>,
    bus: BroadcastBus,
    keepalive: Duration,
}

impl RegistryInner {
    /// Remove a client; true only for the call that actually removed it
    fn deregister(&self, client_id: ClientId, reason: &'static str) -> bool {
        match self.clients.remove(&client_id) {
            Some((_, entry)) => {
                metrics::stream_client_disconnected();
                let lifetime = Utc::now().signed_duration_since(entry.connected_at);
                info!(
                    client_id = %client_id,
                    reason,
                    connected_secs = lifetime.num_seconds(),
                    remaining = self.clients.len(),
                    "Stream client disconnected"
                );
                true
            }
            None => false,
        }
    }
}

/// Registry snapshot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub count: usize,
    pub client_ids: Vec<ClientId>,
    pub timestamp: DateTime<Utc>,
}

/// Manages live streaming connections
///
/// Cheap to clone; all clones share one client map and one bus.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl ConnectionRegistry {
    /// Create a registry with the default keepalive and bus capacity
    pub fn new() -> Self {
        Self::with_settings(DEFAULT_KEEPALIVE, DEFAULT_BUS_CAPACITY)
    }

    pub fn with_settings(keepalive: Duration, bus_capacity: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                clients: DashMap::new(),
                bus: BroadcastBus::new(bus_capacity),
                keepalive,
            }),
        }
    }

    /// Open a new client stream
    ///
    /// Allocates a fresh id, registers it and returns the session stream.
    /// The first item of the stream is `connected`; the client is
    /// deregistered when the stream is dropped, and the stream ends once the
    /// client is deregistered or the bus shuts down.
    pub fn connect(&self) -> Result<ClientSession> {
        let mut client_id = Uuid::new_v4();
        // Subscribe before registering so nothing addressed to the new id is missed
        let mut subscription = self.subscribe(client_id)?;
        let terminated;

        loop {
            match self.inner.clients.entry(client_id) {
                Entry::Vacant(slot) => {
                    let (terminate, rx) = oneshot::channel();
                    slot.insert(ClientEntry {
                        connected_at: Utc::now(),
                        _terminate: terminate,
                    });
                    terminated = rx;
                    break;
                }
                Entry::Occupied(_) => {
                    client_id = Uuid::new_v4();
                    subscription = self.subscribe(client_id)?;
                }
            }
        }

        metrics::stream_client_connected();
        info!(
            client_id = %client_id,
            total = self.inner.clients.len(),
            "Stream client connected"
        );

        let period = self.inner.keepalive;
        let mut keepalive = interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Ok(ClientSession {
            client_id,
            state: SessionState::Connecting,
            subscription,
            terminated,
            keepalive,
            guard: ClientGuard {
                client_id,
                registry: Arc::downgrade(&self.inner),
                released: false,
            },
        })
    }

    fn subscribe(&self, client_id: ClientId) -> Result<Subscription> {
        self.inner.bus.subscribe(client_id).ok_or_else(|| {
            AppError::ServiceUnavailable("notification stream is shut down".to_string())
        })
    }

    /// Deliver a message to one client
    ///
    /// Unknown ids are logged and ignored. Returns whether the message was published.
    pub fn send_to_client(&self, client_id: ClientId, message: StreamMessage) -> bool {
        if self.inner.bus.is_closed() {
            debug!(client_id = %client_id, "Bus closed, dropping direct message");
            return false;
        }
        if !self.inner.clients.contains_key(&client_id) {
            error!(client_id = %client_id, kind = message.kind(), "Client not registered");
            return false;
        }

        metrics::record_stream_publish(message.kind());
        self.inner.bus.publish(Some(client_id), message);
        true
    }

    /// Deliver a message to every registered client
    ///
    /// Returns the number of subscriptions it was handed to (0 after shutdown).
    pub fn broadcast(&self, message: StreamMessage) -> usize {
        if self.inner.bus.is_closed() {
            debug!(kind = message.kind(), "Bus closed, dropping broadcast");
            return 0;
        }

        let kind = message.kind().to_string();
        let delivered = self.inner.bus.publish(None, message);
        metrics::record_stream_publish(&kind);
        debug!(kind = %kind, delivered, "Broadcast published");
        delivered
    }

    /// Explicitly deregister a client and end its stream
    ///
    /// Returns false when the client was already gone (e.g. its stream was dropped).
    pub fn disconnect(&self, client_id: ClientId) -> bool {
        if self.inner.deregister(client_id, "explicit disconnect") {
            true
        } else {
            debug!(client_id = %client_id, "Disconnect for unknown or already released client");
            false
        }
    }

    /// Snapshot of registered clients
    pub fn stats(&self) -> RegistryStats {
        let client_ids: Vec<ClientId> = self.inner.clients.iter().map(|e| *e.key()).collect();
        RegistryStats {
            count: client_ids.len(),
            client_ids,
            timestamp: Utc::now(),
        }
    }

    pub fn client_count(&self) -> usize {
        self.inner.clients.len()
    }

    pub fn is_registered(&self, client_id: ClientId) -> bool {
        self.inner.clients.contains_key(&client_id)
    }

    /// False once the bus has been shut down
    pub fn healthy(&self) -> bool {
        !self.inner.bus.is_closed()
    }

    /// Deregister every client and permanently close the bus
    pub fn shutdown(&self) {
        if !self.inner.bus.shutdown() {
            return;
        }

        let ids: Vec<ClientId> = self.inner.clients.iter().map(|e| *e.key()).collect();
        for client_id in &ids {
            self.inner.deregister(*client_id, "shutdown");
        }
        info!(released = ids.len(), "Notification stream shut down");
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases the registry entry exactly once, whichever way the session ends
struct ClientGuard {
    client_id: ClientId,
    registry: Weak<RegistryInner>,
    released: bool,
}

impl ClientGuard {
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(inner) = self.registry.upgrade() {
            inner.deregister(self.client_id, "stream closed");
        }
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Lifecycle of one streaming connection; `Closed` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
}

/// Outgoing message stream of one client
///
/// Yields `connected` first, then bus messages for this client merged with
/// keepalive pings. Infinite until the client is disconnected or the bus shuts down.
pub struct ClientSession {
    client_id: ClientId,
    state: SessionState,
    subscription: Subscription,
    terminated: oneshot::Receiver<()>,
    keepalive: Interval,
    guard: ClientGuard,
}

impl ClientSession {
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn close(&mut self) {
        self.state = SessionState::Closed;
        self.guard.release();
    }
}

impl Stream for ClientSession {
    type Item = StreamFrame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        match this.state {
            SessionState::Closed => Poll::Ready(None),
            SessionState::Connecting => {
                this.state = SessionState::Open;
                Poll::Ready(Some(StreamFrame::now(StreamMessage::connected(
                    this.client_id,
                ))))
            }
            SessionState::Open => {
                // Deregistration wins over anything still buffered on the bus
                if Pin::new(&mut this.terminated).poll(cx).is_ready() {
                    this.close();
                    return Poll::Ready(None);
                }

                match this.subscription.poll_next_unpin(cx) {
                    Poll::Ready(Some(message)) => {
                        return Poll::Ready(Some(StreamFrame::now(message)))
                    }
                    Poll::Ready(None) => {
                        this.close();
                        return Poll::Ready(None);
                    }
                    Poll::Pending => {}
                }

                if this.keepalive.poll_tick(cx).is_ready() {
                    return Poll::Ready(Some(StreamFrame::now(StreamMessage::Ping)));
                }

                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventNotification, EventStatus};

    fn event() -> StreamMessage {
        StreamMessage::Event(EventNotification {
            id: "evt-1".to_string(),
            title: "Summit".to_string(),
            summary: "Leaders meet".to_string(),
            status: EventStatus::Created,
        })
    }

    #[tokio::test]
    async fn test_registry_creation() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.client_count(), 0);
        assert!(registry.healthy());
    }

    #[tokio::test]
    async fn test_first_message_is_connected_with_own_id() {
        let registry = ConnectionRegistry::new();
        let mut session = registry.connect().unwrap();
        let id = session.client_id();

        let first = session.next().await.unwrap();
        assert_eq!(first.message, StreamMessage::connected(id));
        assert_eq!(session.state(), SessionState::Open);
        assert!(registry.is_registered(id));
    }

    #[tokio::test]
    async fn test_drop_deregisters_exactly_once() {
        let registry = ConnectionRegistry::new();
        let session = registry.connect().unwrap();
        let id = session.client_id();
        assert_eq!(registry.client_count(), 1);

        drop(session);
        assert_eq!(registry.client_count(), 0);
        assert!(!registry.disconnect(id));
    }

    #[tokio::test]
    async fn test_explicit_disconnect_ends_stream_without_double_release() {
        let registry = ConnectionRegistry::new();
        let mut session = registry.connect().unwrap();
        let id = session.client_id();
        session.next().await.unwrap();

        assert!(registry.disconnect(id));
        assert!(!registry.disconnect(id));
        assert!(session.next().await.is_none());
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(registry.client_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnected_client_behind_the_bus_gets_nothing_more() {
        let registry = ConnectionRegistry::with_settings(DEFAULT_KEEPALIVE, 2);
        let mut session = registry.connect().unwrap();
        let id = session.client_id();
        session.next().await.unwrap();

        assert!(registry.disconnect(id));
        for kind in ["one", "two", "after"] {
            registry.broadcast(StreamMessage::custom(kind, serde_json::Value::Null));
        }

        assert!(!registry.is_registered(id));
        assert!(session.next().await.is_none());
        assert!(session.next().await.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_discards_buffered_messages() {
        let registry = ConnectionRegistry::new();
        let mut session = registry.connect().unwrap();
        session.next().await.unwrap();

        registry.broadcast(event());
        registry.disconnect(session.client_id());

        assert!(session.next().await.is_none());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_client_in_order() {
        let registry = ConnectionRegistry::new();
        let mut sessions: Vec<ClientSession> =
            (0..3).map(|_| registry.connect().unwrap()).collect();

        assert_eq!(registry.broadcast(event()), 3);
        registry.broadcast(StreamMessage::custom("second", serde_json::json!(2)));

        for session in sessions.iter_mut() {
            session.next().await.unwrap(); // connected
            assert_eq!(session.next().await.unwrap().message, event());
            assert_eq!(session.next().await.unwrap().message.kind(), "second");
        }
    }

    #[tokio::test]
    async fn test_late_client_misses_earlier_broadcast() {
        let registry = ConnectionRegistry::new();
        let mut early = registry.connect().unwrap();
        registry.broadcast(event());

        let mut late = registry.connect().unwrap();
        registry.broadcast(StreamMessage::custom("after", serde_json::Value::Null));

        early.next().await.unwrap();
        assert_eq!(early.next().await.unwrap().message, event());

        late.next().await.unwrap();
        assert_eq!(late.next().await.unwrap().message.kind(), "after");
    }

    #[tokio::test]
    async fn test_send_to_client_targets_single_client() {
        let registry = ConnectionRegistry::new();
        let mut a = registry.connect().unwrap();
        let mut b = registry.connect().unwrap();
        a.next().await.unwrap();
        b.next().await.unwrap();

        assert!(registry.send_to_client(a.client_id(), event()));
        registry.broadcast(StreamMessage::custom("all", serde_json::Value::Null));

        assert_eq!(a.next().await.unwrap().message, event());
        assert_eq!(b.next().await.unwrap().message.kind(), "all");
    }

    #[tokio::test]
    async fn test_send_to_unknown_client_is_noop() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.send_to_client(Uuid::new_v4(), event()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_ping_after_period() {
        let registry = ConnectionRegistry::with_settings(Duration::from_secs(25), 16);
        let mut session = registry.connect().unwrap();
        session.next().await.unwrap();

        let started = Instant::now();
        let frame = session.next().await.unwrap();
        assert_eq!(frame.message, StreamMessage::Ping);
        assert!(started.elapsed() >= Duration::from_secs(25));

        let frame = session.next().await.unwrap();
        assert_eq!(frame.message, StreamMessage::Ping);
        assert!(started.elapsed() >= Duration::from_secs(50));
    }

    #[tokio::test]
    async fn test_stats_and_health() {
        let registry = ConnectionRegistry::new();
        let a = registry.connect().unwrap();
        let b = registry.connect().unwrap();

        let stats = registry.stats();
        assert_eq!(stats.count, 2);
        assert!(stats.client_ids.contains(&a.client_id()));
        assert!(stats.client_ids.contains(&b.client_id()));
    }

    #[tokio::test]
    async fn test_shutdown_releases_everything() {
        let registry = ConnectionRegistry::new();
        let mut session = registry.connect().unwrap();
        session.next().await.unwrap();

        registry.shutdown();

        assert!(!registry.healthy());
        assert_eq!(registry.client_count(), 0);
        assert_eq!(registry.broadcast(event()), 0);
        assert!(!registry.send_to_client(session.client_id(), event()));
        assert!(session.next().await.is_none());
        assert!(registry.connect().is_err());
    }
}
