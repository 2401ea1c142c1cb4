//! Common infrastructure for the voxflow dialogue runtime.
//!
//! This crate holds the pieces every other voxflow crate leans on:
//!
//! - [`events`]: the event bus contract consumed by the dialogue layer and
//!   an in-process implementation of it
//! - [`errors`]: shared error and result types
//! - [`config`]: configuration file loading
//! - [`logging`]: `tracing` subscriber bootstrap

pub mod config;
pub mod errors;
pub mod events;
pub mod logging;

pub use errors::{Error, Result};
pub use events::{
    Delivery, EventBus, EventError, EventHandler, EventPayload, EventResult, LocalEventBus,
    SubscriptionId,
};
