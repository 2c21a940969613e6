//! Exponential retry delay.

use std::time::Duration;

use vaultfs_core::config::WorkerConfig;

/// `delay = min(initial * factor^(attempt - 1), max)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt.
    pub initial: Duration,
    /// Cap on any delay.
    pub max: Duration,
}

impl BackoffPolicy {
    /// Policy from broker configuration.
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.initial_delay_ms),
            max: Duration::from_millis(config.max_backoff_ms.max(config.initial_delay_ms)),
        }
    }

    /// Delay before the next run, after `attempt` (1-based) has failed.
    ///
    /// Factors below 1 are treated as 1 so delays never shrink.
    pub fn delay(&self, attempt: i32, factor: f64) -> Duration {
        let factor = if factor.is_finite() { factor.max(1.0) } else { 1.0 };
        let exponent = attempt.saturating_sub(1).max(0);
        let scaled = self.initial.as_secs_f64() * factor.powi(exponent);
        let max = self.max.as_secs_f64();
        if !scaled.is_finite() || scaled >= max {
            self.max
        } else {
            Duration::from_secs_f64(scaled)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_exponential_then_capped() {
        let p = policy();
        assert_eq!(p.delay(1, 2.0), Duration::from_secs(1));
        assert_eq!(p.delay(2, 2.0), Duration::from_secs(2));
        assert_eq!(p.delay(4, 2.0), Duration::from_secs(8));
        assert_eq!(p.delay(7, 2.0), Duration::from_secs(60));
        assert_eq!(p.delay(10_000, 2.0), Duration::from_secs(60));
    }

    #[test]
    fn test_non_decreasing() {
        let p = policy();
        for factor in [0.5, 1.0, 1.5, 3.0, f64::NAN] {
            let delays: Vec<Duration> = (1..40).map(|a| p.delay(a, factor)).collect();
            assert!(delays.windows(2).all(|w| w[0] <= w[1]), "factor {factor}");
            assert!(delays.iter().all(|d| *d <= p.max));
        }
    }
}
