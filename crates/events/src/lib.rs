//! # Zenith Events
//!
//! Internal broadcast event structures published by the engine on every
//! execution cycle, reconciler pass, and maintenance sweep, and consumed by
//! the alerter (and any future observer). Not a wire protocol to an external
//! client — just the decoupling point between "the engine did something" and
//! "someone should be told".
//!
//! As a Layer 0 crate, it depends only on `core-types`.

pub mod error;
pub mod messages;

pub use error::EventsError;
pub use messages::{ActionError, LogLevel, LogMessage, TrialExpired, WsMessage};
