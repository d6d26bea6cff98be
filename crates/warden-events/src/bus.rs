//! Broadcast event bus.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::event::WardenEvent;

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Fan-out bus for [`WardenEvent`]s.
///
/// Cloning is cheap; all clones publish into the same channel. Slow
/// receivers lose the oldest events rather than applying backpressure to
/// publishers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<WardenEvent>>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus with room for `capacity` in-flight events per receiver.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            capacity: capacity.max(1),
        }
    }

    /// Publish an event.
    ///
    /// Returns the number of receivers that will see it.
    pub fn publish(&self, event: WardenEvent) -> usize {
        let event = Arc::new(event);
        match self.sender.send(Arc::clone(&event)) {
            Ok(count) => {
                debug!(
                    event_type = event.event_type(),
                    receiver_count = count,
                    "Event published"
                );
                count
            },
            Err(_) => {
                trace!(event_type = event.event_type(), "No receivers for event");
                0
            },
        }
    }

    /// Subscribe to every event.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
            prefix: None,
        }
    }

    /// Subscribe to events whose type starts with `prefix`
    /// (e.g. `request:` or `execution:`).
    #[must_use]
    pub fn subscribe_prefix(&self, prefix: impl Into<String>) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
            prefix: Some(prefix.into()),
        }
    }

    /// Number of live receivers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Channel capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half of an [`EventBus`] subscription.
#[derive(Debug)]
pub struct EventReceiver {
    receiver: broadcast::Receiver<Arc<WardenEvent>>,
    prefix: Option<String>,
}

impl EventReceiver {
    fn matches(&self, event: &WardenEvent) -> bool {
        self.prefix
            .as_deref()
            .is_none_or(|p| event.event_type().starts_with(p))
    }

    /// Wait for the next matching event.
    ///
    /// Returns `None` once every sender is gone. Lagged events are skipped
    /// with a warning.
    pub async fn recv(&mut self) -> Option<Arc<WardenEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => {},
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(skipped = count, "Event receiver lagged, events dropped");
                },
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next matching event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Arc<WardenEvent>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => {},
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!(skipped = count, "Event receiver lagged, events dropped");
                },
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }

    /// Drain every matching event currently buffered.
    pub fn drain(&mut self) -> Vec<Arc<WardenEvent>> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::event::EventMetadata;

    fn expired() -> WardenEvent {
        WardenEvent::RequestExpired {
            metadata: EventMetadata::new("test"),
            request_id: Uuid::new_v4(),
        }
    }

    fn started() -> WardenEvent {
        WardenEvent::ExecutionStarted {
            metadata: EventMetadata::new("test"),
            execution_id: Uuid::new_v4(),
            container: "warden-test".to_string(),
            command: "ls".to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        assert_eq!(bus.publish(expired()), 1);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "request:expired");
    }

    #[tokio::test]
    async fn test_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(expired()), 0);
    }

    #[tokio::test]
    async fn test_prefix_filter() {
        let bus = EventBus::new();
        let mut requests = bus.subscribe_prefix("request:");
        let mut executions = bus.subscribe_prefix("execution:");

        bus.publish(started());
        bus.publish(expired());

        let event = requests.recv().await.unwrap();
        assert_eq!(event.event_type(), "request:expired");
        assert!(requests.try_recv().is_none());

        let event = executions.recv().await.unwrap();
        assert_eq!(event.event_type(), "execution:started");
        assert!(executions.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_clones_share_channel() {
        let bus = EventBus::with_capacity(8);
        let clone = bus.clone();
        let mut rx = bus.subscribe();

        clone.publish(expired());
        assert!(rx.try_recv().is_some());
        assert_eq!(bus.capacity(), 8);
        assert_eq!(clone.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_lagged_receiver_keeps_going() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe();

        for _ in 0..5 {
            bus.publish(expired());
        }

        let drained = rx.drain();
        assert_eq!(drained.len(), 2);
    }

    #[tokio::test]
    async fn test_recv_returns_none_when_closed() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        drop(bus);
        assert!(rx.recv().await.is_none());
    }
}
