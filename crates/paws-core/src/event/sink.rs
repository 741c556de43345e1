//! Message sink port.
//!
//! A sink receives one rendered line per notable engine event. Sinks are
//! best-effort: a failing sink is logged and otherwise ignored.

use paws_types::error::SinkError;

/// Destination for human-readable run messages.
pub trait MessageSink: Send + Sync {
    fn write(&self, message: &str) -> Result<(), SinkError>;
}

/// Sink that forwards every message to `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MessageSink for TracingSink {
    fn write(&self, message: &str) -> Result<(), SinkError> {
        tracing::info!(target: "paws::run", "{message}");
        Ok(())
    }
}
