//! Session-Flow Orchestrator
//!
//! [`Dialog`] turns dialogue events into flows. Reactive flows start when a
//! registered intent is recognized; proactive flows start when a session
//! carrying an application-chosen correlation token reports that it has
//! started. Either way a session runs at most one flow at a time: admission
//! goes through the [`SessionRegistry`] and the slot is released when the
//! flow engine reports completion.

mod correlation;
mod dispatch;

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info};
use voxflow_infra_common::events::{EventBus, EventHandler, SubscriptionId};

use crate::config::DialogConfig;
use crate::errors::Result;
use crate::flow::{DialogFlowEngine, FlowAction, FlowEngine, FlowOutcome};
use crate::messages::{
    publish_message, ContinueSession, DialogEvent, EndSession, OutgoingMessage, StartSession,
};
use crate::payload::{convention_for, PayloadConvention};
use crate::registry::SessionRegistry;
use crate::types::SessionId;

pub use correlation::SessionFlowHandle;

/// Binds a starting intent to the action that opens its flow
#[derive(Clone)]
pub struct FlowRegistration {
    pub intent: String,
    pub action: Arc<dyn FlowAction>,
}

impl FlowRegistration {
    pub fn new(intent: impl Into<String>, action: Arc<dyn FlowAction>) -> Self {
        Self {
            intent: intent.into(),
            action,
        }
    }
}

impl std::fmt::Debug for FlowRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowRegistration")
            .field("intent", &self.intent)
            .finish_non_exhaustive()
    }
}

/// Published on [`Dialog::outcomes`] once a flow is over and its session
/// slot has been released
#[derive(Debug, Clone)]
pub struct FlowFinished {
    pub session_id: SessionId,
    pub outcome: FlowOutcome,
}

/// Shared state reachable from bus handlers and completion tasks
pub(crate) struct DialogInner {
    pub(crate) bus: Arc<dyn EventBus>,
    pub(crate) convention: Arc<dyn PayloadConvention>,
    pub(crate) engine: Arc<dyn FlowEngine>,
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) outcomes: broadcast::Sender<FlowFinished>,
    /// Every subscription this dialog installed, so `destroy` can remove them
    subscriptions: Mutex<Vec<(String, SubscriptionId)>>,
}

impl DialogInner {
    pub(crate) fn track(&self, topic: impl Into<String>, id: SubscriptionId) {
        self.subscriptions.lock().push((topic.into(), id));
    }

    pub(crate) fn untrack(&self, id: SubscriptionId) {
        self.subscriptions.lock().retain(|(_, tracked)| *tracked != id);
    }
}

/// Session-flow orchestrator.
///
/// Cheap to clone; clones share registrations and the session registry.
/// Bus handlers only hold a weak reference, so dropping every clone stops
/// new admissions even without [`destroy`](Self::destroy).
#[derive(Clone)]
pub struct Dialog {
    inner: Arc<DialogInner>,
}

impl std::fmt::Debug for Dialog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialog")
            .field("convention", &self.inner.convention)
            .field("active_sessions", &self.inner.registry.len())
            .field("subscriptions", &self.inner.subscriptions.lock().len())
            .finish()
    }
}

impl Dialog {
    /// A dialog with default configuration and the default flow engine
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        DialogBuilder::new(bus).build()
    }

    pub fn builder(bus: Arc<dyn EventBus>) -> DialogBuilder {
        DialogBuilder::new(bus)
    }

    fn weak(&self) -> Weak<DialogInner> {
        Arc::downgrade(&self.inner)
    }

    /// The registry enforcing one flow per session
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.inner.registry
    }

    /// Number of bus subscriptions this dialog currently holds
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.lock().len()
    }

    /// Receive a [`FlowFinished`] for every flow that ends from now on
    pub fn outcomes(&self) -> broadcast::Receiver<FlowFinished> {
        self.inner.outcomes.subscribe()
    }

    /// Listen to a raw dialogue event such as `session_queued` or `intents`.
    pub fn on(&self, event: DialogEvent, handler: EventHandler) -> SubscriptionId {
        let topic = event.topic();
        let id = self.inner.bus.subscribe(&topic, handler);
        self.inner.track(topic, id);
        id
    }

    /// Remove a listener installed with [`on`](Self::on)
    pub fn off(&self, event: &DialogEvent, id: SubscriptionId) -> bool {
        self.inner.untrack(id);
        self.inner.bus.unsubscribe(&event.topic(), id)
    }

    /// Publish an outgoing message encoded with this dialog's payload convention
    pub async fn publish(&self, message: impl Into<OutgoingMessage>) -> Result<usize> {
        let message = message.into();
        publish_message(self.inner.bus.as_ref(), self.inner.convention.as_ref(), &message).await
    }

    /// Ask the dialogue engine to open a session. Pair with
    /// [`session_flow`](Self::session_flow) using the same `custom_data` to
    /// run a flow once it starts.
    pub async fn start_session(&self, message: StartSession) -> Result<usize> {
        self.publish(message).await
    }

    pub async fn continue_session(&self, message: ContinueSession) -> Result<usize> {
        self.publish(message).await
    }

    pub async fn end_session(&self, message: EndSession) -> Result<usize> {
        self.publish(message).await
    }

    /// Remove every subscription this dialog installed. Running flows are not
    /// interrupted and still release their sessions when they complete.
    pub fn destroy(&self) {
        let subscriptions = std::mem::take(&mut *self.inner.subscriptions.lock());
        let count = subscriptions.len();
        for (topic, id) in subscriptions {
            self.inner.bus.unsubscribe(&topic, id);
        }
        info!("Dialog destroyed, removed {} subscriptions", count);
    }
}

/// Builder for [`Dialog`]
pub struct DialogBuilder {
    bus: Arc<dyn EventBus>,
    config: DialogConfig,
    convention: Option<Arc<dyn PayloadConvention>>,
    engine: Option<Arc<dyn FlowEngine>>,
    registry: Option<Arc<SessionRegistry>>,
}

impl DialogBuilder {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            bus,
            config: DialogConfig::default(),
            convention: None,
            engine: None,
            registry: None,
        }
    }

    pub fn config(mut self, config: DialogConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the payload convention derived from `use_json_api`
    pub fn convention(mut self, convention: Arc<dyn PayloadConvention>) -> Self {
        self.convention = Some(convention);
        self
    }

    /// Use a custom flow engine instead of [`DialogFlowEngine`]
    pub fn engine(mut self, engine: Arc<dyn FlowEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Share an existing registry
    pub fn registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Dialog {
        let convention = self
            .convention
            .unwrap_or_else(|| convention_for(self.config.use_json_api));
        let engine = self
            .engine
            .unwrap_or_else(|| Arc::new(DialogFlowEngine::new(self.bus.clone(), convention.clone())));
        let registry = self.registry.unwrap_or_default();
        let (outcomes, _) = broadcast::channel(self.config.outcome_capacity.max(1));

        debug!(
            "Building dialog '{}' with {:?} payloads",
            self.config.service_name, convention
        );

        Dialog {
            inner: Arc::new(DialogInner {
                bus: self.bus,
                convention,
                engine,
                registry,
                outcomes,
                subscriptions: Mutex::new(Vec::new()),
            }),
        }
    }
}
