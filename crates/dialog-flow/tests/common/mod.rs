#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use voxflow_dialog_flow::{FlowAction, FlowCompletion, FlowEngine, FlowOutcome, SessionId};
use voxflow_infra_common::events::{Delivery, EventBus, EventPayload, LocalEventBus};

pub const WAIT: Duration = Duration::from_secs(2);

/// Log to the test output; `RUST_LOG` overrides the default level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// A flow start seen by [`RecordingEngine`]
#[derive(Debug, Clone)]
pub struct Started {
    pub session_id: SessionId,
    pub trigger: EventPayload,
}

/// Flow engine that records every start and leaves completion to the test
#[derive(Default)]
pub struct RecordingEngine {
    starts: Mutex<Vec<Started>>,
    pending: Mutex<Vec<(SessionId, oneshot::Sender<FlowOutcome>)>>,
    notify: Mutex<Option<mpsc::UnboundedSender<Started>>>,
}

impl RecordingEngine {
    /// Engine plus a channel that yields each start as it happens
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Started>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = RecordingEngine::default();
        *engine.notify.lock() = Some(tx);
        (Arc::new(engine), rx)
    }

    pub fn starts(&self) -> Vec<Started> {
        self.starts.lock().clone()
    }

    /// Resolve the pending flow of `session_id`
    pub fn complete(&self, session_id: &str, outcome: FlowOutcome) -> bool {
        let mut pending = self.pending.lock();
        match pending.iter().position(|(id, _)| id.as_str() == session_id) {
            Some(index) => {
                let (_, done) = pending.remove(index);
                done.send(outcome).is_ok()
            }
            None => false,
        }
    }

    /// Drop the completion sender without resolving it
    pub fn abandon(&self, session_id: &str) {
        self.pending.lock().retain(|(id, _)| id.as_str() != session_id);
    }
}

impl FlowEngine for RecordingEngine {
    fn start(
        &self,
        session_id: SessionId,
        _action: Arc<dyn FlowAction>,
        trigger: EventPayload,
    ) -> FlowCompletion {
        let (tx, rx) = oneshot::channel();
        let started = Started {
            session_id: session_id.clone(),
            trigger,
        };
        self.starts.lock().push(started.clone());
        self.pending.lock().push((session_id, tx));
        if let Some(notify) = self.notify.lock().as_ref() {
            let _ = notify.send(started);
        }
        rx
    }
}

/// Forward everything published on `topic` to a channel
pub fn tap(bus: &LocalEventBus, topic: &str) -> mpsc::UnboundedReceiver<Value> {
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

pub async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("channel closed")
}

/// Assert nothing arrives on `rx` for a short while
pub async fn assert_quiet<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>) {
    if let Ok(Some(value)) = timeout(Duration::from_millis(100), rx.recv()).await {
        panic!("unexpected message: {:?}", value);
    }
}

/// Let spawned delivery and completion tasks run
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}
