use crate::models::event::OutboundEvent;
use tokio::sync::broadcast;
use tracing::trace;

const EVENT_BUS_CAPACITY: usize = 1024;

/// Fan-out of outbound events to every connected control client
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<OutboundEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, event: OutboundEvent) {
        // Events are dropped while nobody listens
        if self.tx.send(event).is_err() {
            trace!("No event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutboundEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
