//! Core traits defined in `vaultfs-core` and implemented by other crates.

pub mod events;
pub mod queue;

pub use events::{EventPublisher, NoopEventPublisher};
pub use queue::{JobEnqueuer, JobRequest};
