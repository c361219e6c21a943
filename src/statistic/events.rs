//! Event bus (spec.md §4.7, §9 "the only polymorphic surface exposed to embedders"): a small
//! publish-subscribe surface built directly on `tokio::sync::broadcast` rather than a bespoke
//! listener-registry trait, since the teacher's dependency table already carries `tokio::sync`.

use super::registry::{ConnectionId, ConnectionStats};
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum Event {
    /// Fired exactly once per registered connection, after its socket fully closes.
    ConnectionClosed { connection_id: ConnectionId, stats: ConnectionStats },
    /// Fired for pre-response errors reported to the client, before the client socket closes.
    RequestFailed { connection_id: ConnectionId, message: String },
    /// Fired at most once per connection, during registration or at the first stats query that
    /// would otherwise read an inconsistent/missing raw-socket field.
    TlsOverheadUnavailable { connection_id: ConnectionId, reason: &'static str },
}

/// A subscription handle; clone freely, each subscriber gets every event from here on.
pub type EventReceiver = broadcast::Receiver<Event>;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Drops the event on the floor if there are no subscribers; matches an emit-and-forget
    /// publish/subscribe surface with no required listener.
    pub fn emit(&self, event: Event) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(Event::RequestFailed { connection_id: ConnectionId(1), message: "boom".into() });

        let event = rx.recv().await.unwrap();
        match event {
            Event::RequestFailed { connection_id, message } => {
                assert_eq!(connection_id, ConnectionId(1));
                assert_eq!(message, "boom");
            }
            _ => panic!("unexpected event"),
        }
    }
}
