//! Event publishing hook fired after successful file mutations.

use async_trait::async_trait;

use crate::events::DomainEvent;

/// Sink for domain events.
///
/// Publishing is best effort: implementations must not fail the mutation
/// that produced the event.
#[async_trait]
pub trait EventPublisher: Send + Sync + std::fmt::Debug + 'static {
    /// Deliver one event.
    async fn publish(&self, event: DomainEvent);
}

/// Publisher that drops every event.
#[derive(Debug, Clone, Default)]
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, _event: DomainEvent) {}
}
