//! Dialogue topics and outgoing messages
//!
//! Inbound topics are the logical event names the dialogue engine emits;
//! outgoing messages are what flows and applications send back to it.
//! Outgoing structs serialize with snake_case field names; a
//! [`PayloadConvention`](crate::payload::PayloadConvention) rewrites them
//! for transports that expect another casing.

use serde::{Deserialize, Serialize};
use voxflow_infra_common::events::EventBus;

use crate::errors::Result;
use crate::payload::PayloadConvention;
use crate::types::SessionId;

pub const INTENT_PREFIX: &str = "intent/";
pub const INTENTS: &str = "intents";
pub const INTENT_NOT_RECOGNIZED: &str = "intent_not_recognized";
pub const SESSION_STARTED: &str = "session_started";
pub const SESSION_ENDED: &str = "session_ended";
pub const SESSION_QUEUED: &str = "session_queued";

pub const START_SESSION: &str = "start_session";
pub const CONTINUE_SESSION: &str = "continue_session";
pub const END_SESSION: &str = "end_session";

/// Inbound dialogue events an application can listen to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DialogEvent {
    /// A specific intent was recognized
    Intent(String),
    /// Any intent was recognized
    Intents,
    IntentNotRecognized,
    SessionStarted,
    SessionEnded,
    SessionQueued,
}

impl DialogEvent {
    pub fn intent(name: impl Into<String>) -> Self {
        DialogEvent::Intent(name.into())
    }

    /// Bus topic carrying this event
    pub fn topic(&self) -> String {
        match self {
            DialogEvent::Intent(name) => intent_topic(name),
            DialogEvent::Intents => INTENTS.to_string(),
            DialogEvent::IntentNotRecognized => INTENT_NOT_RECOGNIZED.to_string(),
            DialogEvent::SessionStarted => SESSION_STARTED.to_string(),
            DialogEvent::SessionEnded => SESSION_ENDED.to_string(),
            DialogEvent::SessionQueued => SESSION_QUEUED.to_string(),
        }
    }
}

/// Bus topic for a single recognized intent
pub fn intent_topic(intent_name: &str) -> String {
    format!("{}{}", INTENT_PREFIX, intent_name)
}

/// How a programmatically started session opens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionInit {
    /// Speak `text` (if any) and listen for an answer
    Action {
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        intent_filter: Option<Vec<String>>,
        can_be_enqueued: bool,
        send_intent_not_recognized: bool,
    },
    /// Speak `text` and end the session
    Notification { text: String },
}

/// Ask the dialogue engine to open a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSession {
    pub init: SessionInit,
    /// Echoed back on `session_started`; used to correlate proactive flows
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
}

impl StartSession {
    /// An action session tagged with `custom_data`, which is what
    /// [`Dialog::session_flow`](crate::Dialog::session_flow) matches on.
    pub fn action(text: Option<String>, custom_data: impl Into<String>) -> Self {
        StartSession {
            init: SessionInit::Action {
                text,
                intent_filter: None,
                can_be_enqueued: true,
                send_intent_not_recognized: false,
            },
            custom_data: Some(custom_data.into()),
            site_id: None,
        }
    }

    pub fn notification(text: impl Into<String>) -> Self {
        StartSession {
            init: SessionInit::Notification { text: text.into() },
            custom_data: None,
            site_id: None,
        }
    }

    pub fn with_site_id(mut self, site_id: impl Into<String>) -> Self {
        self.site_id = Some(site_id.into());
        self
    }
}

/// Keep a session open and wait for the next user turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinueSession {
    pub session_id: SessionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_filter: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<String>,
    pub send_intent_not_recognized: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<String>,
}

/// Close a session, optionally saying something first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndSession {
    pub session_id: SessionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Any message the dialogue layer publishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingMessage {
    StartSession(StartSession),
    ContinueSession(ContinueSession),
    EndSession(EndSession),
}

impl OutgoingMessage {
    /// Bus topic the message is published on
    pub fn topic(&self) -> &'static str {
        match self {
            OutgoingMessage::StartSession(_) => START_SESSION,
            OutgoingMessage::ContinueSession(_) => CONTINUE_SESSION,
            OutgoingMessage::EndSession(_) => END_SESSION,
        }
    }

    pub(crate) fn to_snake_case_value(&self) -> std::result::Result<serde_json::Value, serde_json::Error> {
        match self {
            OutgoingMessage::StartSession(m) => serde_json::to_value(m),
            OutgoingMessage::ContinueSession(m) => serde_json::to_value(m),
            OutgoingMessage::EndSession(m) => serde_json::to_value(m),
        }
    }
}

impl From<StartSession> for OutgoingMessage {
    fn from(m: StartSession) -> Self {
        OutgoingMessage::StartSession(m)
    }
}

impl From<ContinueSession> for OutgoingMessage {
    fn from(m: ContinueSession) -> Self {
        OutgoingMessage::ContinueSession(m)
    }
}

impl From<EndSession> for OutgoingMessage {
    fn from(m: EndSession) -> Self {
        OutgoingMessage::EndSession(m)
    }
}

/// Encode `message` with `convention` and publish it on its topic.
///
/// Returns how many subscribers the message was queued for.
pub(crate) async fn publish_message(
    bus: &dyn EventBus,
    convention: &dyn PayloadConvention,
    message: &OutgoingMessage,
) -> Result<usize> {
    let payload = convention.encode(message)?;
    let delivered = bus.publish(message.topic(), payload).await?;
    tracing::debug!("Published {} to {} subscriber(s)", message.topic(), delivered);
    Ok(delivered)
}
