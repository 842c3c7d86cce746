//! A typed runtime event bus.
//!
//! Subsystems that need to react to peer lifecycle (the bootstrap cache
//! watching for newly-connected peers, in particular) subscribe to a closed
//! `RuntimeEvent` enum broadcast over a channel rather than holding raw
//! observer pointers into each other.

use tokio::sync::broadcast;

use crate::identifier::NodeIdentifier;

/// Capacity of the event broadcast channel (buffered events per subscriber).
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    PeerConnected { peer: NodeIdentifier, protocol: String },
    PeerDisconnected { peer: NodeIdentifier, protocol: String },
    BindingFailed { protocol: String, reason: String },
    ConnectionFailed { protocol: String, address: String, reason: String },
    EndpointStarted { protocol: String, remote_address: String },
    EndpointStopped { protocol: String, remote_address: String },
    RuntimeStarted,
    RuntimeStopped,
}

/// A sink for runtime events. Implemented by the default broadcast publisher
/// and by anything that wants to observe runtime lifecycle without touching
/// the components that raise it (the bootstrap cache, diagnostics, tests).
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: RuntimeEvent);
}

/// The default publisher: a thin wrapper over `tokio::sync::broadcast`.
///
/// Cloning shares the same underlying channel; `publish` never blocks and
/// silently drops the event if there are no subscribers.
#[derive(Clone)]
pub struct BroadcastEventBus {
    tx: broadcast::Sender<RuntimeEvent>,
}

impl BroadcastEventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPublisher for BroadcastEventBus {
    fn publish(&self, event: RuntimeEvent) {
        let _ = self.tx.send(event);
    }
}

/// A no-op publisher for callers that don't care about event delivery.
pub struct NullEventPublisher;

impl EventPublisher for NullEventPublisher {
    fn publish(&self, _event: RuntimeEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = BroadcastEventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(RuntimeEvent::RuntimeStarted);
        let event = rx.recv().await.unwrap();
        assert_eq!(event, RuntimeEvent::RuntimeStarted);
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = BroadcastEventBus::new();
        bus.publish(RuntimeEvent::RuntimeStopped);
    }
}
