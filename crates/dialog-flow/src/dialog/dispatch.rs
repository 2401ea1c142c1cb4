//! Reactive flows and session admission

use std::sync::{Arc, Weak};

use tracing::{debug, warn};
use voxflow_infra_common::events::{Delivery, EventHandler, EventPayload};

use super::{Dialog, DialogInner, FlowFinished, FlowRegistration};
use crate::errors::FlowError;
use crate::flow::{FlowAction, FlowOutcome};
use crate::messages::intent_topic;
use crate::types::SessionId;

impl DialogInner {
    /// Bind `session_id` to a new flow and start it.
    ///
    /// Returns `false` without side effects if the session already runs a
    /// flow. On success the slot is released once the engine reports
    /// completion, before the outcome is broadcast.
    pub(crate) fn admit(
        &self,
        session_id: SessionId,
        action: Arc<dyn FlowAction>,
        trigger: EventPayload,
    ) -> bool {
        if !self.registry.try_admit(&session_id) {
            return false;
        }

        let completion = self.engine.start(session_id.clone(), action, trigger);
        let registry = self.registry.clone();
        let outcomes = self.outcomes.clone();

        tokio::spawn(async move {
            let outcome = match completion.await {
                Ok(outcome) => outcome,
                Err(_) => FlowOutcome::Failed(Arc::new(
                    FlowError::EngineDropped(session_id.to_string()).into(),
                )),
            };
            registry.release(&session_id);

            if outcome.is_failure() {
                warn!("Flow for session {} {}", session_id, outcome);
            } else {
                debug!("Flow for session {} {}", session_id, outcome);
            }
            // No receivers is fine.
            let _ = outcomes.send(FlowFinished { session_id, outcome });
        });

        true
    }
}

fn intent_handler(
    dialog: Weak<DialogInner>,
    intent: String,
    action: Arc<dyn FlowAction>,
) -> EventHandler {
    Box::new(move |payload: EventPayload| {
        let Some(inner) = dialog.upgrade() else {
            return Delivery::Detach;
        };

        let Some(session_id) = inner.convention.session_id(&payload) else {
            let err = FlowError::MissingField {
                topic: intent_topic(&intent),
                field: "session id",
            };
            warn!("Dropping event: {}", err);
            return Delivery::Keep;
        };

        if !inner.admit(session_id.clone(), action.clone(), payload) {
            debug!(
                "Dropping intent {} for session {}: a flow is already running",
                intent, session_id
            );
        }
        Delivery::Keep
    })
}

impl Dialog {
    /// Start a flow with `action` whenever `intent` is recognized for a
    /// session that is not already running one.
    pub fn flow(&self, intent: impl Into<String>, action: Arc<dyn FlowAction>) {
        self.flows(vec![FlowRegistration::new(intent, action)]);
    }

    /// Register several starting intents at once
    pub fn flows(&self, registrations: Vec<FlowRegistration>) {
        for FlowRegistration { intent, action } in registrations {
            let topic = intent_topic(&intent);
            let handler = intent_handler(self.weak(), intent.clone(), action);
            let id = self.inner.bus.subscribe(&topic, handler);
            self.inner.track(topic, id);
            debug!("Registered flow for intent {}", intent);
        }
    }
}
