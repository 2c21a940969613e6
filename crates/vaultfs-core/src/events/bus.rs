//! In-process event bus backed by a tokio broadcast channel.

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::DomainEvent;
use crate::traits::EventPublisher;

/// Fan-out publisher. Publishing never blocks; slow subscribers lag and
/// miss events rather than stalling the mutation path.
#[derive(Debug, Clone)]
pub struct BroadcastEventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl BroadcastEventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to all subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EventPublisher for BroadcastEventBus {
    async fn publish(&self, event: DomainEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::FileEvent;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = BroadcastEventBus::new(8);
        let mut rx = bus.subscribe();
        let file_id = Uuid::new_v4();

        bus.publish(DomainEvent::new(
            None,
            FileEvent::Deleted {
                file_id,
                path: "/a".into(),
            },
        ))
        .await;

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event.payload,
            FileEvent::Deleted {
                file_id,
                path: "/a".into()
            }
        );
    }
}
