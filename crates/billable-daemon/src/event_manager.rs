//! Central event management and broadcasting

use tokio::sync::broadcast;

use crate::events::{DaemonEvent, SessionEvent, SyncEvent};
use crate::timer::TimerEvent;

/// Central event manager that coordinates all daemon events
pub struct EventManager {
    event_tx: broadcast::Sender<DaemonEvent>,
}

impl EventManager {
    /// Create a new event manager with a broadcast channel
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(1000);
        Self { event_tx }
    }

    /// Subscribe to all daemon events
    pub fn subscribe(&self) -> broadcast::Receiver<DaemonEvent> {
        self.event_tx.subscribe()
    }

    pub fn emit_timer(&self, event: TimerEvent) {
        let _ = self.event_tx.send(DaemonEvent::Timer(event));
    }

    pub fn emit_session(&self, event: SessionEvent) {
        tracing::debug!("Session event: {:?}", event.event_type);
        let _ = self.event_tx.send(DaemonEvent::Session(event));
    }

    pub fn emit_sync(&self, event: SyncEvent) {
        tracing::debug!("Sync event: {:?}", event.event_type);
        let _ = self.event_tx.send(DaemonEvent::Sync(event));
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}
