//! Error types for the dialogue flow layer
//!
//! Admission conflicts and correlation misses are ordinary control flow and
//! never show up here.

use thiserror::Error;
use voxflow_infra_common::config::ConfigError;
use voxflow_infra_common::events::EventError;

/// Result type for dialogue flow operations
pub type Result<T> = std::result::Result<T, FlowError>;

/// Errors surfaced by the dialogue flow layer
#[derive(Debug, Error)]
pub enum FlowError {
    /// An inbound payload lacked a field the layer needs
    #[error("payload on '{topic}' has no {field}")]
    MissingField { topic: String, field: &'static str },

    /// An outgoing message could not be encoded
    #[error("failed to encode {message}: {source}")]
    Encode {
        message: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The event bus refused a publish
    #[error("publish failed: {0}")]
    Publish(#[from] EventError),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A flow engine dropped its completion channel without reporting an outcome
    #[error("flow engine for session {0} went away without completing")]
    EngineDropped(String),
}
