//! Broadcast event bus for distributing `WorkflowEvent` to observers.
//!
//! Built on `tokio::sync::broadcast`. Publishing with no active subscribers
//! is a no-op, so the executor never blocks on slow listeners.

use linkflow_types::event::WorkflowEvent;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default channel capacity used by the engine.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Multi-consumer bus for run lifecycle events.
///
/// Cloning the bus clones the sender, so the engine and its block executor
/// publish into the same channel.
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a subscriber that receives all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: WorkflowEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

/// Drain every event for `run_id` currently buffered in `rx`.
///
/// Lagged gaps are skipped; the scan stops once the channel is empty.
pub fn drain_run_events(
    rx: &mut broadcast::Receiver<WorkflowEvent>,
    run_id: Uuid,
) -> Vec<WorkflowEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) if event.run_id() == run_id => events.push(event),
            Ok(_) => {}
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}
