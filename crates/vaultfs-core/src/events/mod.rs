//! Domain events emitted after successful file mutations.
//!
//! Events are delivered through an [`EventPublisher`](crate::traits::EventPublisher).
//! Follow-up work that must not be lost (thumbnails, cleanup) is enqueued
//! as typed jobs instead of hanging off event subscribers.

pub mod bus;
pub mod file;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use bus::BroadcastEventBus;
pub use file::FileEvent;

/// Wrapper for all domain events with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Unique event ID.
    pub id: Uuid,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// The user who caused the event, `None` for system work.
    pub actor_id: Option<Uuid>,
    /// The event payload.
    pub payload: FileEvent,
}

impl DomainEvent {
    /// Create a new domain event.
    pub fn new(actor_id: Option<Uuid>, payload: FileEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            actor_id,
            payload,
        }
    }
}
