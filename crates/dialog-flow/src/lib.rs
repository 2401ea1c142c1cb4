//! # voxflow-dialog-flow
//!
//! Session-scoped conversation flows for a voice dialogue runtime.
//!
//! The dialogue engine publishes recognized intents and session lifecycle
//! events on an [`EventBus`](voxflow_infra_common::EventBus). A [`Dialog`]
//! listens to those events and hands each session to at most one flow at a
//! time:
//!
//! - **Reactive flows** start when a registered intent is recognized
//!   ([`Dialog::flow`], [`Dialog::flows`]).
//! - **Proactive flows** start when a session the application opened itself
//!   reports `session_started` with a matching correlation token
//!   ([`Dialog::session_flow`]).
//!
//! Events for a session that already runs a flow are dropped, not queued.
//! Each flow is driven by a [`FlowEngine`]; the default [`DialogFlowEngine`]
//! publishes `continue_session` / `end_session` and routes the user's
//! replies back into the flow's actions.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use voxflow_dialog_flow::{action_fn, Dialog, FlowReply};
//! use voxflow_infra_common::LocalEventBus;
//!
//! let bus = Arc::new(LocalEventBus::new());
//! let dialog = Dialog::new(bus);
//!
//! dialog.flow("weather", action_fn(|_msg, flow| async move {
//!     flow.end();
//!     Ok(FlowReply::text("It is sunny"))
//! }));
//! ```

pub mod config;
pub mod errors;
pub mod flow;
pub mod messages;
pub mod payload;
pub mod registry;
pub mod types;

mod dialog;

pub use config::DialogConfig;
pub use dialog::{Dialog, DialogBuilder, FlowFinished, FlowRegistration, SessionFlowHandle};
pub use errors::{FlowError, Result};
pub use flow::{
    action_fn, DialogFlowEngine, FlowAction, FlowCompletion, FlowEngine, FlowHandle, FlowOutcome,
    FlowReply, FlowResult,
};
pub use messages::{ContinueSession, DialogEvent, EndSession, OutgoingMessage, StartSession};
pub use payload::{convention_for, CamelCase, PayloadConvention, SnakeCase};
pub use registry::SessionRegistry;
pub use types::SessionId;
