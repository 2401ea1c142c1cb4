//! Default flow engine: turn-by-turn dialogue over the event bus.
//!
//! Each turn runs the current action, then either closes the session
//! (`end_session`) or keeps it open (`continue_session`) and waits for the
//! first matching reply for this session. Reply listeners are armed before
//! `continue_session` goes out so a fast answer cannot slip past them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;
use voxflow_infra_common::events::{Delivery, EventBus, EventHandler, EventPayload, SubscriptionId};

use super::handle::Step;
use super::{FlowAction, FlowCompletion, FlowEngine, FlowHandle, FlowOutcome};
use crate::messages::{
    intent_topic, publish_message, ContinueSession, EndSession, OutgoingMessage,
    INTENT_NOT_RECOGNIZED, SESSION_ENDED,
};
use crate::payload::PayloadConvention;
use crate::types::SessionId;

/// Starts a [`DialogFlow`] task per admitted session.
#[derive(Clone)]
pub struct DialogFlowEngine {
    bus: Arc<dyn EventBus>,
    convention: Arc<dyn PayloadConvention>,
}

impl DialogFlowEngine {
    pub fn new(bus: Arc<dyn EventBus>, convention: Arc<dyn PayloadConvention>) -> Self {
        Self { bus, convention }
    }
}

impl std::fmt::Debug for DialogFlowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogFlowEngine")
            .field("bus", &"Arc<dyn EventBus>")
            .field("convention", &self.convention)
            .finish()
    }
}

impl FlowEngine for DialogFlowEngine {
    fn start(
        &self,
        session_id: SessionId,
        action: Arc<dyn FlowAction>,
        trigger: EventPayload,
    ) -> FlowCompletion {
        let (done_tx, done_rx) = oneshot::channel();
        let flow = DialogFlow {
            session_id,
            bus: self.bus.clone(),
            convention: self.convention.clone(),
        };

        // Watch for the session ending before the task is even scheduled, so
        // an end arriving right after admission is not missed.
        let (signal_tx, signals) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let end_watch = flow.bus.subscribe(
            SESSION_ENDED,
            flow.session_end_handler(signal_tx.clone(), closed.clone()),
        );
        let watch = EndWatch {
            id: end_watch,
            signal_tx,
            signals,
            closed,
        };
        let span = tracing::info_span!(
            "dialog_flow",
            session_id = %flow.session_id,
            flow_id = %Uuid::new_v4()
        );

        tokio::spawn(
            async move {
                let outcome = flow.run(action, trigger, watch).await;
                if done_tx.send(outcome).is_err() {
                    debug!("Nobody is waiting for the flow outcome");
                }
            }
            .instrument(span),
        );

        done_rx
    }
}

enum Signal {
    /// A reply for step `step`; `intent` is `None` for "not recognized"
    Reply {
        step: u64,
        intent: Option<String>,
        payload: EventPayload,
    },
    SessionEnded,
}

/// The `session_ended` subscription of one flow and the channel it feeds
struct EndWatch {
    id: SubscriptionId,
    signal_tx: mpsc::UnboundedSender<Signal>,
    signals: mpsc::UnboundedReceiver<Signal>,
    closed: Arc<AtomicBool>,
}

/// Conversation state for one session
struct DialogFlow {
    session_id: SessionId,
    bus: Arc<dyn EventBus>,
    convention: Arc<dyn PayloadConvention>,
}

impl DialogFlow {
    async fn run(self, action: Arc<dyn FlowAction>, trigger: EventPayload, watch: EndWatch) -> FlowOutcome {
        let EndWatch {
            id: end_watch,
            signal_tx,
            mut signals,
            closed,
        } = watch;

        info!("Flow started");
        let outcome = self.drive(action, trigger, &signal_tx, &mut signals, &closed).await;
        self.bus.unsubscribe(SESSION_ENDED, end_watch);

        match &outcome {
            FlowOutcome::Failed(err) => error!("Flow failed: {:#}", err),
            other => info!("Flow {}", other),
        }
        outcome
    }

    async fn drive(
        &self,
        mut action: Arc<dyn FlowAction>,
        mut message: EventPayload,
        signal_tx: &mpsc::UnboundedSender<Signal>,
        signals: &mut mpsc::UnboundedReceiver<Signal>,
        closed: &AtomicBool,
    ) -> FlowOutcome {
        let mut step_no: u64 = 0;

        loop {
            let handle = FlowHandle::new(self.session_id.clone());
            let reply = match action.run(message, handle.clone()).await {
                Ok(reply) => reply,
                Err(err) => {
                    if !closed.load(Ordering::Acquire) {
                        let end = EndSession {
                            session_id: self.session_id.clone(),
                            text: None,
                        };
                        if let Err(e) = self.send(end.into()).await {
                            warn!("Could not close session after failure: {}", e);
                        }
                    }
                    return FlowOutcome::Failed(Arc::new(err));
                }
            };

            let step = handle.take_step();
            if closed.load(Ordering::Acquire) {
                return FlowOutcome::SessionEnded;
            }

            if !step.expects_reply() {
                let end = EndSession {
                    session_id: self.session_id.clone(),
                    text: reply.text,
                };
                return match self.send(end.into()).await {
                    Ok(()) => FlowOutcome::Completed,
                    Err(e) => FlowOutcome::Failed(Arc::new(e.into())),
                };
            }

            step_no += 1;
            let listeners = self.arm_step(step_no, &step, signal_tx);
            let cont = ContinueSession {
                session_id: self.session_id.clone(),
                text: reply.text,
                intent_filter: step.intent_filter(),
                custom_data: reply.custom_data,
                send_intent_not_recognized: step.not_recognized.is_some(),
                slot: step.slot.clone(),
            };
            if let Err(e) = self.send(cont.into()).await {
                self.disarm(listeners);
                return FlowOutcome::Failed(Arc::new(e.into()));
            }
            debug!("Waiting for reply to step {}", step_no);

            let next = loop {
                match signals.recv().await {
                    Some(Signal::Reply { step: reply_step, intent, payload })
                        if reply_step == step_no =>
                    {
                        break Some((intent, payload))
                    }
                    // Late reply to an earlier step
                    Some(Signal::Reply { .. }) => continue,
                    Some(Signal::SessionEnded) | None => break None,
                }
            };
            self.disarm(listeners);

            let Some((intent, payload)) = next else {
                return FlowOutcome::SessionEnded;
            };
            match self.next_action(&step, intent.as_deref()) {
                Some(next_action) => {
                    action = next_action;
                    message = payload;
                }
                None => {
                    return FlowOutcome::Failed(Arc::new(anyhow::anyhow!(
                        "no action registered for reply {:?}",
                        intent
                    )))
                }
            }
        }
    }

    fn next_action(&self, step: &Step, intent: Option<&str>) -> Option<Arc<dyn FlowAction>> {
        match intent {
            Some(name) => debug!("Continuing with intent {}", name),
            None => debug!("Continuing with not-recognized handler"),
        }
        step.action_for(intent)
    }

    async fn send(&self, message: OutgoingMessage) -> crate::errors::Result<()> {
        publish_message(self.bus.as_ref(), self.convention.as_ref(), &message).await?;
        Ok(())
    }

    /// Subscribe to every reply the current step can consume
    fn arm_step(
        &self,
        step_no: u64,
        step: &Step,
        signal_tx: &mpsc::UnboundedSender<Signal>,
    ) -> Vec<(String, SubscriptionId)> {
        let mut listeners = Vec::with_capacity(step.continuations.len() + 1);
        for (intent, _) in &step.continuations {
            let topic = intent_topic(intent);
            let handler = self.reply_handler(step_no, Some(intent.clone()), signal_tx.clone());
            let id = self.bus.subscribe(&topic, handler);
            listeners.push((topic, id));
        }
        if step.not_recognized.is_some() {
            let handler = self.reply_handler(step_no, None, signal_tx.clone());
            let id = self.bus.subscribe(INTENT_NOT_RECOGNIZED, handler);
            listeners.push((INTENT_NOT_RECOGNIZED.to_string(), id));
        }
        listeners
    }

    fn disarm(&self, listeners: Vec<(String, SubscriptionId)>) {
        for (topic, id) in listeners {
            self.bus.unsubscribe(&topic, id);
        }
    }

    fn reply_handler(
        &self,
        step: u64,
        intent: Option<String>,
        signal_tx: mpsc::UnboundedSender<Signal>,
    ) -> EventHandler {
        let session_id = self.session_id.clone();
        let convention = self.convention.clone();
        Box::new(move |payload: EventPayload| {
            if convention.session_id(&payload).as_ref() != Some(&session_id) {
                return Delivery::Keep;
            }
            let _ = signal_tx.send(Signal::Reply {
                step,
                intent: intent.clone(),
                payload,
            });
            Delivery::Detach
        })
    }

    fn session_end_handler(
        &self,
        signal_tx: mpsc::UnboundedSender<Signal>,
        closed: Arc<AtomicBool>,
    ) -> EventHandler {
        let session_id = self.session_id.clone();
        let convention = self.convention.clone();
        Box::new(move |payload: EventPayload| {
            if convention.session_id(&payload).as_ref() != Some(&session_id) {
                return Delivery::Keep;
            }
            closed.store(true, Ordering::Release);
            let _ = signal_tx.send(Signal::SessionEnded);
            Delivery::Detach
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{action_fn, FlowReply};
    use crate::messages::CONTINUE_SESSION;
    use crate::messages::END_SESSION;
    use crate::payload::SnakeCase;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::time::timeout;
    use voxflow_infra_common::events::LocalEventBus;

    const WAIT: Duration = Duration::from_secs(2);

    fn engine(bus: &LocalEventBus) -> DialogFlowEngine {
        DialogFlowEngine::new(Arc::new(bus.clone()), Arc::new(SnakeCase))
    }

    /// Forward everything published on `topic` to a channel
    fn tap(bus: &LocalEventBus, topic: &str) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        bus.subscribe(
            topic,
            Box::new(move |payload: EventPayload| {
                let _ = tx.send((*payload).clone());
                Delivery::Keep
            }),
        );
        rx
    }

    #[tokio::test]
    async fn test_single_step_flow_ends_session() {
        let bus = LocalEventBus::new();
        let mut ends = tap(&bus, END_SESSION);

        let action = action_fn(|message, _flow| async move {
            assert_eq!(message["session_id"], "s1");
            Ok(FlowReply::text("It is sunny"))
        });
        let done = engine(&bus).start("s1".into(), action, Arc::new(json!({"session_id": "s1"})));

        let outcome = timeout(WAIT, done).await.unwrap().unwrap();
        assert!(matches!(outcome, FlowOutcome::Completed));

        let end = timeout(WAIT, ends.recv()).await.unwrap().unwrap();
        assert_eq!(end, json!({"session_id": "s1", "text": "It is sunny"}));
    }

    #[tokio::test]
    async fn test_multi_turn_flow_follows_continuation() {
        let bus = LocalEventBus::new();
        let mut continues = tap(&bus, CONTINUE_SESSION);
        let mut ends = tap(&bus, END_SESSION);

        let confirm = action_fn(|message, _flow| async move {
            let city = message["input"].as_str().unwrap_or("nowhere").to_string();
            Ok(FlowReply::text(format!("Booked {}", city)))
        });
        let ask = action_fn(move |_message, flow| {
            let confirm = confirm.clone();
            async move {
                flow.continue_with("city", confirm);
                Ok(FlowReply::text("Which city?").with_custom_data("booking"))
            }
        });

        let done = engine(&bus).start("s1".into(), ask, Arc::new(json!({"session_id": "s1"})));

        let cont = timeout(WAIT, continues.recv()).await.unwrap().unwrap();
        assert_eq!(cont["text"], "Which city?");
        assert_eq!(cont["intent_filter"], json!(["city"]));
        assert_eq!(cont["custom_data"], "booking");
        assert_eq!(cont["send_intent_not_recognized"], false);

        // A reply for another session is not ours.
        bus.publish("intent/city", json!({"session_id": "other", "input": "Rome"})).await.unwrap();
        bus.publish("intent/city", json!({"session_id": "s1", "input": "Paris"})).await.unwrap();

        let outcome = timeout(WAIT, done).await.unwrap().unwrap();
        assert!(matches!(outcome, FlowOutcome::Completed));
        let end = timeout(WAIT, ends.recv()).await.unwrap().unwrap();
        assert_eq!(end["text"], "Booked Paris");
        assert_eq!(bus.subscriber_count("intent/city"), 0);
    }

    #[tokio::test]
    async fn test_not_recognized_branch() {
        let bus = LocalEventBus::new();
        let mut continues = tap(&bus, CONTINUE_SESSION);
        let mut ends = tap(&bus, END_SESSION);

        let sorry = action_fn(|_message, flow| async move {
            flow.end();
            Ok(FlowReply::text("Sorry, I did not get that"))
        });
        let noop = action_fn(|_message, _flow| async { Ok(FlowReply::silent()) });
        let ask = action_fn(move |_message, flow| {
            let (sorry, noop) = (sorry.clone(), noop.clone());
            async move {
                flow.continue_with("yes", noop).not_recognized(sorry);
                Ok(FlowReply::text("Are you sure?"))
            }
        });

        let done = engine(&bus).start("s1".into(), ask, Arc::new(json!({"session_id": "s1"})));
        let cont = timeout(WAIT, continues.recv()).await.unwrap().unwrap();
        assert_eq!(cont["send_intent_not_recognized"], true);

        bus.publish(INTENT_NOT_RECOGNIZED, json!({"session_id": "s1"})).await.unwrap();

        let outcome = timeout(WAIT, done).await.unwrap().unwrap();
        assert!(matches!(outcome, FlowOutcome::Completed));
        let end = timeout(WAIT, ends.recv()).await.unwrap().unwrap();
        assert_eq!(end["text"], "Sorry, I did not get that");
        assert_eq!(bus.subscriber_count("intent/yes"), 0);
        assert_eq!(bus.subscriber_count(INTENT_NOT_RECOGNIZED), 0);
    }

    #[tokio::test]
    async fn test_session_ended_while_waiting() {
        let bus = LocalEventBus::new();
        let mut continues = tap(&bus, CONTINUE_SESSION);

        let noop = action_fn(|_message, _flow| async { Ok(FlowReply::silent()) });
        let ask = action_fn(move |_message, flow| {
            let noop = noop.clone();
            async move {
                flow.continue_with("yes", noop);
                Ok(FlowReply::text("Still there?"))
            }
        });

        let done = engine(&bus).start("s1".into(), ask, Arc::new(json!({"session_id": "s1"})));
        timeout(WAIT, continues.recv()).await.unwrap().unwrap();

        bus.publish(SESSION_ENDED, json!({"session_id": "s2"})).await.unwrap();
        bus.publish(SESSION_ENDED, json!({"session_id": "s1"})).await.unwrap();

        let outcome = timeout(WAIT, done).await.unwrap().unwrap();
        assert!(matches!(outcome, FlowOutcome::SessionEnded));
        assert_eq!(bus.subscriber_count("intent/yes"), 0);
        assert_eq!(bus.subscriber_count(SESSION_ENDED), 0);
    }

    #[tokio::test]
    async fn test_session_ended_before_flow_task_runs() {
        let bus = LocalEventBus::new();

        let noop = action_fn(|_message, _flow| async { Ok(FlowReply::silent()) });
        let ask = action_fn(move |_message, flow| {
            let noop = noop.clone();
            async move {
                flow.continue_with("yes", noop);
                Ok(FlowReply::text("Still there?"))
            }
        });

        // Nothing has yielded since `start`, so the flow task has not run yet.
        let done = engine(&bus).start("s1".into(), ask, Arc::new(json!({"session_id": "s1"})));
        let delivered = bus.publish(SESSION_ENDED, json!({"session_id": "s1"})).await.unwrap();
        assert_eq!(delivered, 1);

        let outcome = timeout(WAIT, done).await.unwrap().unwrap();
        assert!(matches!(outcome, FlowOutcome::SessionEnded));
        assert_eq!(bus.subscriber_count(SESSION_ENDED), 0);
        assert_eq!(bus.subscriber_count("intent/yes"), 0);
    }

    #[tokio::test]
    async fn test_silent_step_omits_text() {
        let bus = LocalEventBus::new();
        let mut continues = tap(&bus, CONTINUE_SESSION);

        let noop = action_fn(|_message, _flow| async { Ok(FlowReply::silent()) });
        let listen = action_fn(move |_message, flow| {
            let noop = noop.clone();
            async move {
                flow.continue_with("yes", noop);
                Ok(FlowReply::silent())
            }
        });

        let _done = engine(&bus).start("s1".into(), listen, Arc::new(json!({"session_id": "s1"})));
        let cont = timeout(WAIT, continues.recv()).await.unwrap().unwrap();
        assert_eq!(
            cont,
            json!({
                "session_id": "s1",
                "intent_filter": ["yes"],
                "send_intent_not_recognized": false
            })
        );
    }

    #[tokio::test]
    async fn test_action_error_is_passed_through() {
        let bus = LocalEventBus::new();
        let mut ends = tap(&bus, END_SESSION);

        let action = action_fn(|_message, _flow| async { Err(anyhow::anyhow!("weather service down")) });
        let done = engine(&bus).start("s1".into(), action, Arc::new(json!({"session_id": "s1"})));

        match timeout(WAIT, done).await.unwrap().unwrap() {
            FlowOutcome::Failed(err) => assert_eq!(err.to_string(), "weather service down"),
            other => panic!("expected failure, got {}", other),
        }
        let end = timeout(WAIT, ends.recv()).await.unwrap().unwrap();
        assert_eq!(end, json!({"session_id": "s1"}));
    }
}
