//! A generic, typed event bus.
//!
//! The teacher's `tower-resilience-core::events` module dispatches to
//! synchronous listener callbacks, catching panics so one misbehaving
//! listener doesn't block the others. This port instead exposes a
//! broadcast channel of typed, tagged event records: subscribers get their
//! own [`tokio::sync::broadcast::Receiver`] and decide for themselves
//! whether to consume, buffer, or drop events, and a slow/absent consumer
//! can never block a producer.

use tokio::sync::broadcast;

/// Default channel capacity; overflowing subscribers see `Lagged` errors
/// on their next `recv()` rather than the bus blocking.
const DEFAULT_CAPACITY: usize = 256;

/// A typed event bus. Cloning an `EventBus` clones the sender handle, so
/// every clone publishes onto the same underlying channel.
#[derive(Debug)]
pub struct EventBus<E: Clone + Send + 'static> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone + Send + 'static> EventBus<E> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Returns the number of active subscribers it
    /// reached; `Ok(0)` (no subscribers) is not an error — production
    /// consumers may choose never to subscribe at all.
    pub fn emit(&self, event: E) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to future events. Events emitted before this call are not
    /// replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone + Send + 'static> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum TestEvent {
        Ping(u32),
    }

    #[tokio::test]
    async fn subscriber_receives_emitted_events_in_order() {
        let bus: EventBus<TestEvent> = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(TestEvent::Ping(1));
        bus.emit(TestEvent::Ping(2));

        assert_eq!(rx.recv().await.unwrap(), TestEvent::Ping(1));
        assert_eq!(rx.recv().await.unwrap(), TestEvent::Ping(2));
    }

    #[tokio::test]
    async fn emitting_with_no_subscribers_does_not_panic() {
        let bus: EventBus<TestEvent> = EventBus::new();
        bus.emit(TestEvent::Ping(1));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn clone_shares_the_underlying_channel() {
        let bus: EventBus<TestEvent> = EventBus::new();
        let bus2 = bus.clone();
        let mut rx = bus.subscribe();

        bus2.emit(TestEvent::Ping(42));
        assert_eq!(rx.recv().await.unwrap(), TestEvent::Ping(42));
    }
}
