use std::sync::Arc;

use paws_types::event::EngineEvent;
use tokio::sync::broadcast;

use super::bus::EventBus;
use super::sink::MessageSink;

/// Fans one engine event out to the event bus and every registered sink.
#[derive(Clone)]
pub struct Notifier {
    bus: EventBus,
    sinks: Vec<Arc<dyn MessageSink>>,
}

impl Notifier {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            sinks: Vec::new(),
        }
    }

    pub fn add_sink(&mut self, sink: Arc<dyn MessageSink>) {
        self.sinks.push(sink);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.bus.subscribe()
    }

    /// Publishes `event`. Sink failures are logged, never returned.
    pub fn emit(&self, event: EngineEvent) {
        if !self.sinks.is_empty() {
            let line = event.to_string();
            for sink in &self.sinks {
                if let Err(err) = sink.write(&line) {
                    tracing::warn!(error = %err, "message sink write failed");
                }
            }
        }
        self.bus.publish(event);
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("bus", &self.bus)
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
