//! Error types shared across voxflow crates.

use thiserror::Error;

use crate::config::ConfigError;
use crate::events::EventError;

/// Result alias for infrastructure operations
pub type Result<T> = std::result::Result<T, Error>;

/// Infrastructure-level error
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be loaded or was invalid
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The logging subsystem could not be initialized
    #[error("logging error: {0}")]
    Logging(String),

    /// The event bus rejected an operation
    #[error("event error: {0}")]
    Event(#[from] EventError),
}
