use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::FlowAction;
use crate::types::SessionId;

/// What the action of the current turn asked for
#[derive(Default)]
pub(crate) struct Step {
    pub continuations: Vec<(String, Arc<dyn FlowAction>)>,
    pub not_recognized: Option<Arc<dyn FlowAction>>,
    pub slot: Option<String>,
    pub ended: bool,
}

impl Step {
    /// Whether the session should stay open for another user turn
    pub fn expects_reply(&self) -> bool {
        !self.ended && (!self.continuations.is_empty() || self.not_recognized.is_some())
    }

    pub fn intent_filter(&self) -> Option<Vec<String>> {
        if self.continuations.is_empty() {
            None
        } else {
            Some(self.continuations.iter().map(|(name, _)| name.clone()).collect())
        }
    }

    /// Action to run for a reply; `None` intent means "not recognized"
    pub fn action_for(&self, intent: Option<&str>) -> Option<Arc<dyn FlowAction>> {
        match intent {
            Some(name) => self
                .continuations
                .iter()
                .find(|(candidate, _)| candidate == name)
                .map(|(_, action)| action.clone()),
            None => self.not_recognized.clone(),
        }
    }
}

/// Handle passed to every action of a flow.
///
/// Registrations only apply to the turn in which they are made; each new
/// step starts from a clean slate.
#[derive(Clone)]
pub struct FlowHandle {
    session_id: SessionId,
    step: Arc<Mutex<Step>>,
}

impl FlowHandle {
    pub(crate) fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            step: Arc::new(Mutex::new(Step::default())),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Continue the session and run `action` if the user answers with `intent`.
    /// Registering the same intent twice keeps the latest action.
    pub fn continue_with(&self, intent: impl Into<String>, action: Arc<dyn FlowAction>) -> &Self {
        let intent = intent.into();
        let mut step = self.step.lock();
        step.continuations.retain(|(name, _)| *name != intent);
        step.continuations.push((intent, action));
        self
    }

    /// Like [`continue_with`](Self::continue_with) but asks the dialogue
    /// engine to fill `slot` of the next answer.
    pub fn continue_with_slot(
        &self,
        intent: impl Into<String>,
        slot: impl Into<String>,
        action: Arc<dyn FlowAction>,
    ) -> &Self {
        self.step.lock().slot = Some(slot.into());
        self.continue_with(intent, action)
    }

    /// Run `action` if the next user turn is not understood.
    pub fn not_recognized(&self, action: Arc<dyn FlowAction>) -> &Self {
        self.step.lock().not_recognized = Some(action);
        self
    }

    /// End the session after this turn, whatever else was registered.
    pub fn end(&self) {
        self.step.lock().ended = true;
    }

    pub(crate) fn take_step(&self) -> Step {
        std::mem::take(&mut *self.step.lock())
    }
}

impl fmt::Debug for FlowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = self.step.lock();
        f.debug_struct("FlowHandle")
            .field("session_id", &self.session_id)
            .field(
                "continuations",
                &step.continuations.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>(),
            )
            .field("not_recognized", &step.not_recognized.is_some())
            .field("ended", &step.ended)
            .finish()
    }
}
