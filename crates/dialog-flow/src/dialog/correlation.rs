//! Proactive flows matched by correlation token
//!
//! The application starts a session itself, tagging it with custom data, and
//! registers a waiter for that token. The first `session_started` carrying
//! the token consumes the waiter and starts the flow; later ones are ignored.
//! A waiter whose session never starts stays armed until it is cancelled or
//! the dialog is destroyed.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};
use voxflow_infra_common::events::{Delivery, EventHandler, EventPayload, SubscriptionId};

use super::{Dialog, DialogInner};
use crate::errors::FlowError;
use crate::flow::FlowAction;
use crate::messages::SESSION_STARTED;

struct CorrelationWaiter {
    token: String,
    /// Taken exactly once, by the first match or by cancellation
    action: Mutex<Option<Arc<dyn FlowAction>>>,
    /// Set right after subscribing; held while the dialog starts tracking it
    subscription: Mutex<Option<SubscriptionId>>,
}

impl CorrelationWaiter {
    fn take(&self) -> Option<Arc<dyn FlowAction>> {
        self.action.lock().take()
    }

    /// Forget the fired waiter's subscription in the dialog
    fn untrack(&self, dialog: &DialogInner) {
        if let Some(id) = *self.subscription.lock() {
            dialog.untrack(id);
        }
    }

    fn is_armed(&self) -> bool {
        self.action.lock().is_some()
    }
}

/// Returned by [`Dialog::session_flow`]; used to check on or cancel the waiter
#[derive(Clone)]
pub struct SessionFlowHandle {
    subscription: SubscriptionId,
    waiter: Arc<CorrelationWaiter>,
}

impl SessionFlowHandle {
    pub fn token(&self) -> &str {
        &self.waiter.token
    }

    /// `true` until the waiter has fired or been cancelled
    pub fn is_armed(&self) -> bool {
        self.waiter.is_armed()
    }
}

impl std::fmt::Debug for SessionFlowHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFlowHandle")
            .field("token", &self.waiter.token)
            .field("subscription", &self.subscription)
            .field("armed", &self.is_armed())
            .finish()
    }
}

fn session_started_handler(dialog: Weak<DialogInner>, waiter: Arc<CorrelationWaiter>) -> EventHandler {
    Box::new(move |payload: EventPayload| {
        let Some(inner) = dialog.upgrade() else {
            return Delivery::Detach;
        };

        if inner.convention.custom_data(&payload) != Some(waiter.token.as_str()) {
            return Delivery::Keep;
        }

        let Some(session_id) = inner.convention.session_id(&payload) else {
            let err = FlowError::MissingField {
                topic: SESSION_STARTED.to_string(),
                field: "session id",
            };
            warn!("Ignoring session start for token {}: {}", waiter.token, err);
            return Delivery::Keep;
        };

        // Cancelled between delivery and now
        let Some(action) = waiter.take() else {
            return Delivery::Detach;
        };
        waiter.untrack(&inner);

        debug!("Token {} matched session {}", waiter.token, session_id);
        if !inner.admit(session_id.clone(), action, payload) {
            debug!(
                "Dropping proactive flow for {}: session {} already runs a flow",
                waiter.token, session_id
            );
        }
        Delivery::Detach
    })
}

impl Dialog {
    /// Run `action` as a flow for the first session that starts with
    /// `custom_data` equal to `token`.
    pub fn session_flow(&self, token: impl Into<String>, action: Arc<dyn FlowAction>) -> SessionFlowHandle {
        let waiter = Arc::new(CorrelationWaiter {
            token: token.into(),
            action: Mutex::new(Some(action)),
            subscription: Mutex::new(None),
        });

        let handler = session_started_handler(self.weak(), waiter.clone());
        let subscription = self.inner.bus.subscribe(SESSION_STARTED, handler);
        {
            // A waiter that already fired has untracked itself, or will once
            // this lock is released.
            let mut slot = waiter.subscription.lock();
            *slot = Some(subscription);
            if waiter.is_armed() {
                self.inner.track(SESSION_STARTED, subscription);
            }
        }
        debug!("Waiting for a session started with token {}", waiter.token);

        SessionFlowHandle { subscription, waiter }
    }

    /// Disarm a waiter that has not fired yet.
    ///
    /// Returns `true` if this call cancelled it, `false` if it had already
    /// fired or been cancelled.
    pub fn cancel_session_flow(&self, handle: &SessionFlowHandle) -> bool {
        let cancelled = handle.waiter.take().is_some();
        self.inner.bus.unsubscribe(SESSION_STARTED, handle.subscription);
        self.inner.untrack(handle.subscription);
        if cancelled {
            debug!("Cancelled session flow for token {}", handle.waiter.token);
        }
        cancelled
    }
}
