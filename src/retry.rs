// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Retry Backoff Policy
 * Exponential backoff with jitter for requeued probe tasks
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use rand::Rng;
use std::time::Duration;

use crate::config::SchedulerConfig;

/// Computes the not-before delay for a retry-queued task.
///
/// Retries are an explicit requeue processed by the scheduler's pulling
/// loop, so this policy only produces durations; it never drives the
/// operation itself.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0) to prevent thundering herd
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.3,
        }
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.retry_initial_backoff_ms),
            max: Duration::from_millis(config.retry_max_backoff_ms),
            multiplier: 2.0,
            jitter_factor: config.retry_jitter,
        }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter_factor = 0.0;
        self
    }

    /// Calculate backoff duration for a given attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_secs(0);
        }

        let base = self.initial.as_millis() as f64 * self.multiplier.powi((attempt - 1) as i32);
        let capped = base.min(self.max.as_millis() as f64);

        let with_jitter = if self.jitter_factor > 0.0 && capped > 0.0 {
            let mut rng = rand::rng();
            let jitter_range = capped * self.jitter_factor;
            let jitter = rng.random_range(-jitter_range..jitter_range);
            (capped + jitter).max(0.0)
        } else {
            capped
        };

        Duration::from_millis(with_jitter as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let policy = BackoffPolicy {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_factor: 0.0,
        };

        assert_eq!(policy.delay_for(0), Duration::from_secs(0));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_caps_at_max() {
        let policy = BackoffPolicy {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(5),
            multiplier: 2.0,
            jitter_factor: 0.0,
        };

        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for(10), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_band() {
        let policy = BackoffPolicy {
            initial: Duration::from_millis(1000),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.5,
        };

        for _ in 0..50 {
            let delay = policy.delay_for(1).as_millis() as f64;
            assert!((500.0..=1500.0).contains(&delay), "delay {} out of band", delay);
        }
    }
}
