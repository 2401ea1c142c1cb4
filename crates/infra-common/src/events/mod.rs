//! Event bus contract and the in-process implementation.
//!
//! Events are addressed by a topic string (`intent/<name>`, `session_started`,
//! ...) and carry a JSON payload whose field naming is owned by the
//! transport. Handlers are plain synchronous closures: they are expected to
//! do their bookkeeping and return promptly, handing any long-running work
//! to a spawned task.
//!
//! Each subscription is a single consumer. Deliveries to one subscription are
//! sequential, deliveries to different subscriptions may run concurrently.

pub mod local;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use local::LocalEventBus;

/// Payload handed to every subscriber of a topic
pub type EventPayload = Arc<serde_json::Value>;

/// Result alias for event bus operations
pub type EventResult<T> = std::result::Result<T, EventError>;

/// Handler invoked once per delivered payload.
///
/// The returned [`Delivery`] decides whether the subscription stays armed.
pub type EventHandler = Box<dyn Fn(EventPayload) -> Delivery + Send + Sync>;

/// What a handler wants to happen to its own subscription after a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Keep receiving events
    Keep,
    /// Remove this subscription; nothing further is delivered to it, even
    /// payloads that were already queued
    Detach,
}

/// Identifies one subscription on a bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Event bus errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventError {
    /// The bus has been shut down
    #[error("event bus closed: {0}")]
    Closed(String),

    /// A payload could not be converted to or from its wire shape
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Serialization(err.to_string())
    }
}

/// Publish/subscribe contract between the dialogue layer and the transport.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Register `handler` for `topic`.
    ///
    /// The handler is invoked asynchronously with respect to both the caller
    /// and the publisher.
    fn subscribe(&self, topic: &str, handler: EventHandler) -> SubscriptionId;

    /// Remove a subscription. Returns `false` if it was not registered
    /// (already removed or detached); this is not an error.
    fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool;

    /// Queue `payload` for every current subscriber of `topic` and return how
    /// many subscribers it was queued for.
    ///
    /// Resolves once each of those subscribers has handled the payload or
    /// been removed, so anything a handler did (including subscribing) is
    /// visible to the publisher's next `publish`, whatever its topic.
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> EventResult<usize>;

    /// Number of live subscriptions on `topic`
    fn subscriber_count(&self, topic: &str) -> usize;
}
