//! Engine event distribution.
//!
//! Provides an `EventBus` that distributes `EngineEvent` messages to all
//! subscribers via a `tokio::sync::broadcast` channel, the `MessageSink`
//! port for line-oriented run logs, and the `Notifier` that feeds both.

pub mod bus;
pub mod notifier;
pub mod sink;

pub use bus::EventBus;
pub use notifier::Notifier;
pub use sink::{MessageSink, TracingSink};
