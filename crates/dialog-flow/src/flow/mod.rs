//! Flow engine contract
//!
//! A flow engine drives one multi-turn conversation for one session. The
//! orchestrator only needs two things from it: a way to start a flow, and a
//! single completion notification once the flow is over, whatever the
//! reason. Completion is delivered through a oneshot channel so that it can
//! never run inside [`FlowEngine::start`] itself.

mod dialog_flow;
mod handle;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use voxflow_infra_common::events::EventPayload;

use crate::types::SessionId;

pub use dialog_flow::DialogFlowEngine;
pub use handle::FlowHandle;

/// What an action returns: the reply for the current turn or an
/// application error that fails the flow.
pub type FlowResult = anyhow::Result<FlowReply>;

/// Resolves once with the outcome of a flow.
pub type FlowCompletion = oneshot::Receiver<FlowOutcome>;

/// One step of a conversation.
///
/// Receives the event that triggered the step and a handle used to decide
/// what happens next (continue on some intents, or end the session).
#[async_trait]
pub trait FlowAction: Send + Sync {
    async fn run(&self, message: EventPayload, flow: FlowHandle) -> FlowResult;
}

/// Adapter turning an async closure into a [`FlowAction`]
pub struct FnAction<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> FlowAction for FnAction<F>
where
    F: Fn(EventPayload, FlowHandle) -> Fut + Send + Sync,
    Fut: Future<Output = FlowResult> + Send + 'static,
{
    async fn run(&self, message: EventPayload, flow: FlowHandle) -> FlowResult {
        (self.f)(message, flow).await
    }
}

/// Wrap an async closure as a shareable action.
///
/// ```ignore
/// let action = action_fn(|_message, flow| async move {
///     flow.end();
///     Ok(FlowReply::text("Goodbye"))
/// });
/// ```
pub fn action_fn<F, Fut>(f: F) -> Arc<dyn FlowAction>
where
    F: Fn(EventPayload, FlowHandle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FlowResult> + Send + 'static,
{
    Arc::new(FnAction { f })
}

/// What the current turn says back to the user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowReply {
    pub text: Option<String>,
    pub custom_data: Option<String>,
}

impl FlowReply {
    pub fn text(text: impl Into<String>) -> Self {
        FlowReply {
            text: Some(text.into()),
            custom_data: None,
        }
    }

    /// Say nothing this turn
    pub fn silent() -> Self {
        FlowReply::default()
    }

    pub fn with_custom_data(mut self, custom_data: impl Into<String>) -> Self {
        self.custom_data = Some(custom_data.into());
        self
    }
}

impl From<&str> for FlowReply {
    fn from(text: &str) -> Self {
        FlowReply::text(text)
    }
}

impl From<String> for FlowReply {
    fn from(text: String) -> Self {
        FlowReply::text(text)
    }
}

/// How a flow ended
#[derive(Debug, Clone)]
pub enum FlowOutcome {
    /// The flow ran to its last step and closed the session
    Completed,
    /// The dialogue engine ended the session while the flow was running
    SessionEnded,
    /// An action or the engine itself failed; the error is passed through as is
    Failed(Arc<anyhow::Error>),
}

impl FlowOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, FlowOutcome::Failed(_))
    }
}

impl fmt::Display for FlowOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowOutcome::Completed => write!(f, "completed"),
            FlowOutcome::SessionEnded => write!(f, "session ended"),
            FlowOutcome::Failed(err) => write!(f, "failed: {:#}", err),
        }
    }
}

/// Starts flows.
///
/// Implementations must resolve the returned [`FlowCompletion`] exactly once,
/// when the flow reaches a terminal state. Dropping the sender without a
/// value is treated by the orchestrator as a failure.
pub trait FlowEngine: Send + Sync {
    fn start(
        &self,
        session_id: SessionId,
        action: Arc<dyn FlowAction>,
        trigger: EventPayload,
    ) -> FlowCompletion;
}
