//! # vaultfs-worker
//!
//! The task broker: durable job queues with per-queue worker pools,
//! exponential backoff for transient failures and cron-driven maintenance.

pub mod backoff;
pub mod broker;
pub mod executor;
pub mod jobs;
pub mod runner;
pub mod scheduler;

pub use backoff::BackoffPolicy;
pub use broker::Broker;
pub use executor::{JobExecutionError, JobExecutor, JobHandler};
pub use runner::WorkerRunner;
pub use scheduler::CronScheduler;
