//! Fan-out of run events (run, layer, controller and iteration progress).
//!
//! Events are observational: nothing in the engine waits on a subscriber,
//! and a subscriber that falls more than `capacity` events behind skips
//! ahead with `RecvError::Lagged` instead of slowing the run down.

use paws_types::event::EngineEvent;
use tokio::sync::broadcast;

/// Broadcast channel shared by every component of one workflow.
///
/// Clones publish into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// `capacity` is the per-subscriber backlog; zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receives every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Sends `event` to current subscribers; dropped when there are none.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}
