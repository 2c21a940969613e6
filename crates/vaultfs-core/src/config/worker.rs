//! Task broker configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Background job broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Whether the broker runs in this process.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Interval in milliseconds between idle queue polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Worker slots per queue. Queues not listed get `default_concurrency`.
    #[serde(default = "default_queues")]
    pub queues: HashMap<String, usize>,
    /// Worker slots for queues missing from `queues`.
    #[serde(default = "default_concurrency")]
    pub default_concurrency: usize,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    /// Multiplier applied per attempt.
    #[serde(default = "default_factor")]
    pub backoff_factor: f64,
    /// Upper bound on any retry delay, in milliseconds.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// Attempts allowed when a job does not set its own.
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: i32,
    /// Soft-deleted files older than this are hard-purged.
    #[serde(default = "default_trash_retention")]
    pub trash_retention_hours: i64,
    /// Succeeded jobs older than this are removed.
    #[serde(default = "default_job_retention")]
    pub job_retention_hours: i64,
    /// Cron expressions for recurring jobs.
    #[serde(default)]
    pub cron: CronConfig,
}

impl WorkerConfig {
    /// Worker slots for the given queue.
    pub fn concurrency_for(&self, queue: &str) -> usize {
        self.queues
            .get(queue)
            .copied()
            .unwrap_or(self.default_concurrency)
            .max(1)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: default_poll_interval(),
            queues: default_queues(),
            default_concurrency: default_concurrency(),
            initial_delay_ms: default_initial_delay(),
            backoff_factor: default_factor(),
            max_backoff_ms: default_max_backoff(),
            default_max_attempts: default_max_attempts(),
            trash_retention_hours: default_trash_retention(),
            job_retention_hours: default_job_retention(),
            cron: CronConfig::default(),
        }
    }
}

/// Six-field cron expressions (with seconds) for recurring jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronConfig {
    /// Expire stale upload sessions.
    #[serde(default = "default_upload_sweep")]
    pub upload_sweep: String,
    /// Hard-purge the trash.
    #[serde(default = "default_trash_purge")]
    pub trash_purge: String,
    /// Aggregate storage statistics.
    #[serde(default = "default_storage_stats")]
    pub storage_stats: String,
    /// Probe every storage policy.
    #[serde(default = "default_policy_health")]
    pub policy_health: String,
    /// Drop old succeeded jobs.
    #[serde(default = "default_job_cleanup")]
    pub job_cleanup: String,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            upload_sweep: default_upload_sweep(),
            trash_purge: default_trash_purge(),
            storage_stats: default_storage_stats(),
            policy_health: default_policy_health(),
            job_cleanup: default_job_cleanup(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_queues() -> HashMap<String, usize> {
    HashMap::from([
        ("thumbnail".to_string(), 2),
        ("maintenance".to_string(), 1),
        ("default".to_string(), 4),
    ])
}

fn default_concurrency() -> usize {
    2
}

fn default_initial_delay() -> u64 {
    1_000
}

fn default_factor() -> f64 {
    2.0
}

fn default_max_backoff() -> u64 {
    600_000
}

fn default_max_attempts() -> i32 {
    5
}

fn default_trash_retention() -> i64 {
    72
}

fn default_job_retention() -> i64 {
    168
}

fn default_upload_sweep() -> String {
    "0 */10 * * * *".to_string()
}

fn default_trash_purge() -> String {
    "0 0 3 * * *".to_string()
}

fn default_storage_stats() -> String {
    "0 30 * * * *".to_string()
}

fn default_policy_health() -> String {
    "0 */5 * * * *".to_string()
}

fn default_job_cleanup() -> String {
    "0 0 4 * * *".to_string()
}
