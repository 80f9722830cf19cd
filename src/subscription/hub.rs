use crate::state::{ChangeSink, Record, World};
use crate::subscription::protocol::{self, InboundEntry, ProtocolError};
use anyhow::Context;
use dashmap::DashMap;
use futures::{Sink, SinkExt};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub type SubscriberId = Uuid;

/// Default per-subscriber outbound queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Inbound side of a subscriber: its id and a sender onto its own queue
#[derive(Debug, Clone)]
pub struct SubscriberHandle {
    id: SubscriberId,
    outbound: mpsc::Sender<String>,
}

impl SubscriberHandle {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Send directly to this subscriber, waiting for queue capacity
    async fn send(&self, message: String) -> Result<(), IngestError> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| IngestError::Disconnected)
    }
}

/// Outbound side of a subscriber, drained by [`Hub::pump`]
#[derive(Debug)]
pub struct OutboundQueue {
    id: SubscriberId,
    rx: mpsc::Receiver<String>,
}

impl OutboundQueue {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next queued message; `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv)
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

/// Result of ingesting one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
    Continue,
    /// Empty message: the peer is done
    Close,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestError {
    /// Message rejected; the connection may continue
    Protocol(ProtocolError),
    /// Subscriber's own queue is gone
    Disconnected,
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::Protocol(e) => write!(f, "{}", e),
            IngestError::Disconnected => write!(f, "subscriber disconnected"),
        }
    }
}

impl std::error::Error for IngestError {}

impl From<ProtocolError> for IngestError {
    fn from(e: ProtocolError) -> Self {
        IngestError::Protocol(e)
    }
}

/// Hub counters exposed on /stats
#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub subscribers: usize,
    pub messages_broadcast: u64,
    pub messages_dropped: u64,
}

/// Registry entry for one subscriber
struct Subscriber {
    tx: mpsc::Sender<String>,
    /// Set on the first drop after a successful send, cleared on the next success
    lagging: AtomicBool,
    /// Drops in the current lagging episode
    dropped: AtomicU64,
}

impl Subscriber {
    fn new(tx: mpsc::Sender<String>) -> Self {
        Self {
            tx,
            lagging: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }
}

/// Active subscriber set. Registered on the world as its change sink.
struct SubscriberRegistry {
    subscribers: DashMap<SubscriberId, Subscriber>,
    messages_broadcast: AtomicU64,
    messages_dropped: AtomicU64,
}

impl SubscriberRegistry {
    fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            messages_broadcast: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue `message` on every subscriber without waiting.
    ///
    /// Full queues drop this message for that subscriber only; closed queues
    /// are pruned.
    fn broadcast(&self, message: &str) {
        let mut closed = Vec::new();

        for entry in self.subscribers.iter() {
            let subscriber = entry.value();
            match subscriber.tx.try_send(message.to_string()) {
                Ok(()) => {
                    if subscriber.lagging.swap(false, Ordering::Relaxed) {
                        info!(
                            subscriber_id = %entry.key(),
                            dropped = subscriber.dropped.swap(0, Ordering::Relaxed),
                            "Subscriber caught up"
                        );
                    }
                }
                Err(TrySendError::Full(_)) => {
                    self.messages_dropped.fetch_add(1, Ordering::Relaxed);
                    subscriber.dropped.fetch_add(1, Ordering::Relaxed);
                    // One warning per lagging episode, not per write
                    if !subscriber.lagging.swap(true, Ordering::Relaxed) {
                        warn!(subscriber_id = %entry.key(), "Outbound queue full, dropping updates");
                    }
                }
                Err(TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }

        // Shard guards from the iteration above are released by now
        for id in closed {
            if self.subscribers.remove(&id).is_some() {
                debug!(subscriber_id = %id, "Pruned closed subscriber");
            }
        }

        self.messages_broadcast.fetch_add(1, Ordering::Relaxed);
    }
}

impl ChangeSink for SubscriberRegistry {
    fn entity_changed(&self, entity_id: &str, record: &Record) {
        match protocol::encode_entity(entity_id, record) {
            Ok(message) => self.broadcast(&message),
            Err(e) => error!(entity_id = %entity_id, error = %e, "Failed to encode update"),
        }
    }
}

/// Fans world changes out to subscribers and applies their inbound messages
pub struct Hub {
    world: Arc<World>,
    registry: Arc<SubscriberRegistry>,
    queue_capacity: usize,
}

impl Hub {
    /// Create a hub and register it as the world's change sink
    pub fn new(world: Arc<World>, queue_capacity: usize) -> Self {
        let registry = Arc::new(SubscriberRegistry::new());
        world.add_listener(registry.clone());

        Self {
            world,
            registry,
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> (SubscriberHandle, OutboundQueue) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.queue_capacity);

        self.registry.subscribers.insert(id, Subscriber::new(tx.clone()));
        info!(
            subscriber_id = %id,
            subscribers = self.registry.subscribers.len(),
            "Subscriber registered"
        );

        (SubscriberHandle { id, outbound: tx }, OutboundQueue { id, rx })
    }

    /// Remove a subscriber; safe to call more than once
    pub fn unsubscribe(&self, handle: &SubscriberHandle) -> bool {
        self.unsubscribe_id(handle.id)
    }

    pub fn unsubscribe_id(&self, id: SubscriberId) -> bool {
        let removed = self.registry.subscribers.remove(&id).is_some();
        if removed {
            info!(
                subscriber_id = %id,
                subscribers = self.registry.subscribers.len(),
                "Subscriber removed"
            );
        }
        removed
    }

    /// Enqueue `{entity_id: record}` on every subscriber's queue
    pub fn broadcast_one(&self, entity_id: &str, record: &Record) {
        self.registry.entity_changed(entity_id, record);
    }

    /// Drain `queue` into `sink` until the queue closes or a write fails
    pub async fn pump<S>(&self, mut queue: OutboundQueue, sink: S) -> anyhow::Result<()>
    where
        S: Sink<String>,
        S::Error: std::error::Error + Send + Sync + 'static,
    {
        let mut sink = std::pin::pin!(sink);

        while let Some(message) = queue.recv().await {
            sink.send(message)
                .await
                .with_context(|| format!("write to subscriber {} failed", queue.id))?;
        }

        debug!(subscriber_id = %queue.id, "Outbound queue closed");
        Ok(())
    }

    /// Apply one inbound message from `handle`.
    ///
    /// Empty values answer the sender with the full world; records are
    /// written to the world, which echoes them to every subscriber
    /// (the sender included).
    pub async fn ingest(
        &self,
        handle: &SubscriberHandle,
        raw: &str,
    ) -> Result<Ingested, IngestError> {
        if raw.trim().is_empty() {
            return Ok(Ingested::Close);
        }

        for entry in protocol::parse_inbound(raw)? {
            match entry {
                InboundEntry::SnapshotRequest { entity_id } => {
                    debug!(subscriber_id = %handle.id, entity_id = %entity_id, "Full world requested");
                    let message = protocol::encode_snapshot(&self.world.snapshot())?;
                    handle.send(message).await?;
                }
                InboundEntry::Set { entity_id, record } => {
                    self.world.set(&entity_id, record);
                }
            }
        }

        Ok(Ingested::Continue)
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.subscribers.len()
    }

    pub fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.registry.subscribers.contains_key(&id)
    }

    /// Whether the subscriber's last broadcast was dropped on a full queue
    pub fn is_lagging(&self, id: SubscriberId) -> bool {
        self.registry
            .subscribers
            .get(&id)
            .map(|s| s.lagging.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            subscribers: self.subscriber_count(),
            messages_broadcast: self.registry.messages_broadcast.load(Ordering::Relaxed),
            messages_dropped: self.registry.messages_dropped.load(Ordering::Relaxed),
        }
    }
}
