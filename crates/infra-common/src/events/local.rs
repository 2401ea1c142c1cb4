//! In-process implementation of the event bus.
//!
//! Every subscription owns an unbounded queue drained by its own Tokio task,
//! so handlers never run on the publisher's task and a slow handler only
//! delays its own subscription. `publish` waits for the handlers it queued
//! for, which keeps one publisher's events causally ordered across topics.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use super::{Delivery, EventBus, EventError, EventHandler, EventPayload, EventResult, SubscriptionId};

/// A queued payload and the signal that it has been handled
struct Envelope {
    payload: EventPayload,
    handled: oneshot::Sender<()>,
}

/// A registered subscriber as seen from the publishing side
struct Subscriber {
    id: SubscriptionId,
    /// Cleared on unsubscribe/detach; the delivery task checks it before
    /// every payload
    active: Arc<AtomicBool>,
    sender: mpsc::UnboundedSender<Envelope>,
}

impl Subscriber {
    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

struct BusInner {
    topics: DashMap<String, Vec<Subscriber>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl BusInner {
    fn remove(&self, topic: &str, id: SubscriptionId) -> bool {
        let mut removed = false;
        if let Some(mut subscribers) = self.topics.get_mut(topic) {
            if let Some(pos) = subscribers.iter().position(|s| s.id == id) {
                let subscriber = subscribers.remove(pos);
                subscriber.deactivate();
                removed = true;
            }
        }
        // Drop empty topic entries so the map does not grow with one-off
        // per-session topics.
        self.topics.remove_if(topic, |_, subscribers| subscribers.is_empty());
        removed
    }
}

/// In-process event bus.
///
/// Cloning is cheap; all clones share the same subscriber table.
#[derive(Clone)]
pub struct LocalEventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for LocalEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEventBus")
            .field("topics", &self.inner.topics.len())
            .field("closed", &self.inner.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl LocalEventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                topics: DashMap::new(),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Removes every subscription and rejects further publishes.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        for entry in self.inner.topics.iter() {
            for subscriber in entry.value() {
                subscriber.deactivate();
            }
        }
        self.inner.topics.clear();
        debug!("Shut down LocalEventBus");
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    async fn deliver(
        inner: Weak<BusInner>,
        topic: String,
        id: SubscriptionId,
        active: Arc<AtomicBool>,
        handler: EventHandler,
        mut receiver: mpsc::UnboundedReceiver<Envelope>,
    ) {
        // Dropping an envelope unhandled also releases its publisher.
        while let Some(Envelope { payload, handled }) = receiver.recv().await {
            if !active.load(Ordering::Acquire) {
                break;
            }
            if handler(payload) == Delivery::Detach {
                active.store(false, Ordering::Release);
                if let Some(inner) = inner.upgrade() {
                    inner.remove(&topic, id);
                }
                trace!("{} on '{}' detached itself", id, topic);
                let _ = handled.send(());
                break;
            }
            let _ = handled.send(());
        }
        trace!("Delivery task for {} on '{}' finished", id, topic);
    }
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for LocalEventBus {
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime; the delivery task is
    /// spawned immediately.
    fn subscribe(&self, topic: &str, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(!self.is_closed()));

        tokio::spawn(Self::deliver(
            Arc::downgrade(&self.inner),
            topic.to_string(),
            id,
            active.clone(),
            handler,
            receiver,
        ));

        if active.load(Ordering::Acquire) {
            self.inner
                .topics
                .entry(topic.to_string())
                .or_default()
                .push(Subscriber { id, active, sender });
            debug!("Subscribed {} to '{}'", id, topic);
        }
        id
    }

    fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool {
        let removed = self.inner.remove(topic, id);
        if removed {
            debug!("Unsubscribed {} from '{}'", id, topic);
        }
        removed
    }

    async fn publish(&self, topic: &str, payload: serde_json::Value) -> EventResult<usize> {
        if self.is_closed() {
            return Err(EventError::Closed(format!("cannot publish to '{}'", topic)));
        }

        let payload: EventPayload = Arc::new(payload);
        let mut pending = Vec::new();
        if let Some(subscribers) = self.inner.topics.get(topic) {
            for subscriber in subscribers.iter() {
                if !subscriber.active.load(Ordering::Acquire) {
                    continue;
                }
                let (handled, done) = oneshot::channel();
                let envelope = Envelope {
                    payload: payload.clone(),
                    handled,
                };
                if subscriber.sender.send(envelope).is_ok() {
                    pending.push(done);
                }
            }
        }

        let delivered = pending.len();
        // A closed receiver means the subscription went away first.
        join_all(pending).await;

        trace!("Published to '{}' ({} subscribers)", topic, delivered);
        Ok(delivered)
    }

    fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.topics.get(topic).map(|s| s.len()).unwrap_or(0)
    }
}
