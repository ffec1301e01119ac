// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Adaptive Rate Limiter
 * Per-target token buckets with AIMD rate control
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use nonzero_ext::*;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{ScanError, ScanResult};

type DirectLimiter = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Requests per second for a target with no history
    pub default_rate: u32,

    /// Rate never drops below this
    pub rate_floor: u32,

    /// Rate never rises above this
    pub rate_ceiling: u32,

    /// Token bucket burst cap
    pub burst_size: u32,

    /// Additive increase applied after a success streak
    pub additive_step: u32,

    /// Multiplicative decrease applied on error or slow response
    pub backoff_multiplier: f64,

    /// Success latency above this is treated as overload
    pub latency_threshold: Duration,

    /// Consecutive fast successes required before the rate is raised
    pub success_streak: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            default_rate: 10,
            rate_floor: 1,
            rate_ceiling: 50,
            burst_size: 5,
            additive_step: 1,
            backoff_multiplier: 0.5,
            latency_threshold: Duration::from_millis(500),
            success_streak: 10,
        }
    }
}

impl RateLimiterConfig {
    pub fn from_scheduler(config: &crate::config::SchedulerConfig) -> Self {
        Self {
            default_rate: config.default_rate_per_target,
            rate_floor: config.rate_floor,
            rate_ceiling: config.rate_ceiling,
            burst_size: config.burst_size,
            additive_step: config.additive_step,
            backoff_multiplier: config.backoff_multiplier,
            latency_threshold: config.latency_threshold(),
            success_streak: config.success_streak,
        }
    }
}

/// Per-target rolling stats and bucket.
///
/// Written only by the worker that just finished a probe for this target;
/// counters are atomics so unrelated targets never serialize on a shared
/// lock.
struct TargetStats {
    /// Current allowed requests per second
    rate: AtomicU32,

    /// Consecutive under-threshold successes since the last rate change
    streak: AtomicU32,

    /// Total errors observed for this target
    error_count: AtomicU64,

    /// Exponential moving average of probe latency, in microseconds
    avg_latency_us: AtomicU64,

    /// Token bucket; replaced when the rate changes
    limiter: parking_lot::Mutex<Arc<DirectLimiter>>,
}

impl TargetStats {
    fn new(rate: u32, burst: u32) -> Self {
        Self {
            rate: AtomicU32::new(rate),
            streak: AtomicU32::new(0),
            error_count: AtomicU64::new(0),
            avg_latency_us: AtomicU64::new(0),
            limiter: parking_lot::Mutex::new(Self::build_limiter(rate, burst)),
        }
    }

    fn build_limiter(rate: u32, burst: u32) -> Arc<DirectLimiter> {
        let quota = Quota::per_second(NonZeroU32::new(rate).unwrap_or(nonzero!(1u32)))
            .allow_burst(NonZeroU32::new(burst).unwrap_or(nonzero!(1u32)));
        Arc::new(GovernorRateLimiter::direct(quota))
    }

    fn swap_limiter(&self, rate: u32, burst: u32) {
        *self.limiter.lock() = Self::build_limiter(rate, burst);
    }

    fn update_avg_latency(&self, latency: Duration) {
        let sample = latency.as_micros() as u64;
        let mut current = self.avg_latency_us.load(Ordering::Relaxed);
        loop {
            let next = if current == 0 {
                sample
            } else {
                (current * 7 + sample * 3) / 10
            };
            match self.avg_latency_us.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }
}

/// Adaptive per-target rate limiter.
///
/// Additive increase, multiplicative decrease: reacts fast to overload and
/// recovers cautiously. A target with unbroken errors converges to the floor
/// and stays there; giving up on it is the scheduler's retry policy, never
/// the limiter's.
pub struct AdaptiveRateLimiter {
    config: RateLimiterConfig,
    targets: RwLock<HashMap<String, Arc<TargetStats>>>,
}

impl AdaptiveRateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        info!(
            "Rate limiter initialized: {} req/s default, range [{}, {}], burst {}",
            config.default_rate, config.rate_floor, config.rate_ceiling, config.burst_size
        );
        Self {
            config,
            targets: RwLock::new(HashMap::new()),
        }
    }

    async fn stats_for(&self, target_key: &str) -> Arc<TargetStats> {
        {
            let targets = self.targets.read().await;
            if let Some(stats) = targets.get(target_key) {
                return Arc::clone(stats);
            }
        }

        let mut targets = self.targets.write().await;
        Arc::clone(targets.entry(target_key.to_string()).or_insert_with(|| {
            Arc::new(TargetStats::new(
                self.config.default_rate,
                self.config.burst_size,
            ))
        }))
    }

    /// Block until the target's bucket grants a token, or the run is
    /// cancelled.
    pub async fn wait_token(
        &self,
        target_key: &str,
        cancel: &CancellationToken,
    ) -> ScanResult<()> {
        let stats = self.stats_for(target_key).await;
        let limiter = Arc::clone(&*stats.limiter.lock());

        tokio::select! {
            _ = cancel.cancelled() => Err(ScanError::Cancelled),
            _ = limiter.until_ready() => Ok(()),
        }
    }

    /// Feed one completed probe back into the target's rate.
    ///
    /// Called by the worker that just finished the probe. Errors and
    /// over-threshold latencies halve the rate (bounded by the floor); a
    /// sustained streak of fast successes raises it by one additive step
    /// (bounded by the ceiling).
    pub async fn report_outcome(&self, target_key: &str, latency: Duration, was_error: bool) {
        let stats = self.stats_for(target_key).await;

        if !was_error {
            stats.update_avg_latency(latency);
        }

        let overloaded = was_error || latency > self.config.latency_threshold;

        if overloaded {
            if was_error {
                stats.error_count.fetch_add(1, Ordering::Relaxed);
            }
            stats.streak.store(0, Ordering::Relaxed);

            let previous = stats
                .rate
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |rate| {
                    let reduced = (rate as f64 * self.config.backoff_multiplier) as u32;
                    Some(reduced.max(self.config.rate_floor).max(1))
                })
                .unwrap_or(0);
            let current = stats.rate.load(Ordering::Acquire);

            if current < previous {
                warn!(
                    "[WARNING] Backing off {}: {} -> {} req/s (error={}, latency={:?})",
                    target_key, previous, current, was_error, latency
                );
                stats.swap_limiter(current, self.config.burst_size);
            }
            return;
        }

        let streak = stats.streak.fetch_add(1, Ordering::Relaxed) + 1;
        if streak >= self.config.success_streak {
            stats.streak.store(0, Ordering::Relaxed);

            let previous = stats
                .rate
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |rate| {
                    Some(
                        rate.saturating_add(self.config.additive_step)
                            .min(self.config.rate_ceiling),
                    )
                })
                .unwrap_or(0);
            let current = stats.rate.load(Ordering::Acquire);

            if current > previous {
                debug!(
                    "Raising rate for {}: {} -> {} req/s after {} fast responses",
                    target_key, previous, current, streak
                );
                stats.swap_limiter(current, self.config.burst_size);
            }
        }
    }

    /// Current allowed rate for a target; the default if it has no history.
    pub async fn current_rate(&self, target_key: &str) -> u32 {
        let targets = self.targets.read().await;
        targets
            .get(target_key)
            .map(|s| s.rate.load(Ordering::Acquire))
            .unwrap_or(self.config.default_rate)
    }

    /// Average observed success latency for a target, if any.
    pub async fn avg_latency(&self, target_key: &str) -> Option<Duration> {
        let targets = self.targets.read().await;
        targets.get(target_key).and_then(|s| {
            let us = s.avg_latency_us.load(Ordering::Relaxed);
            (us > 0).then(|| Duration::from_micros(us))
        })
    }

    /// (target, rate, errors) triples for every tracked target.
    pub async fn stats(&self) -> Vec<(String, u32, u64)> {
        let targets = self.targets.read().await;
        targets
            .iter()
            .map(|(key, stats)| {
                (
                    key.clone(),
                    stats.rate.load(Ordering::Acquire),
                    stats.error_count.load(Ordering::Relaxed),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> Duration {
        Duration::from_millis(50)
    }

    fn test_config() -> RateLimiterConfig {
        RateLimiterConfig {
            default_rate: 16,
            rate_floor: 2,
            rate_ceiling: 64,
            burst_size: 4,
            additive_step: 2,
            backoff_multiplier: 0.5,
            latency_threshold: Duration::from_millis(500),
            success_streak: 3,
        }
    }

    #[tokio::test]
    async fn test_first_request_uses_default_rate() {
        let limiter = AdaptiveRateLimiter::new(test_config());
        assert_eq!(limiter.current_rate("a:80").await, 16);
    }

    #[tokio::test]
    async fn test_errors_decrease_rate_monotonically_to_floor() {
        let limiter = AdaptiveRateLimiter::new(test_config());
        let key = "a:80";

        let mut previous = limiter.current_rate(key).await;
        for _ in 0..10 {
            limiter.report_outcome(key, fast(), true).await;
            let current = limiter.current_rate(key).await;
            assert!(current <= previous, "rate must be non-increasing on errors");
            assert!(current >= 2, "rate must never fall below the floor");
            previous = current;
        }
        assert_eq!(previous, 2, "unbroken errors converge to the floor");
    }

    #[tokio::test]
    async fn test_fast_successes_increase_rate_to_ceiling() {
        let limiter = AdaptiveRateLimiter::new(test_config());
        let key = "a:80";

        let mut previous = limiter.current_rate(key).await;
        for _ in 0..200 {
            limiter.report_outcome(key, fast(), false).await;
            let current = limiter.current_rate(key).await;
            assert!(current >= previous, "rate must be non-decreasing on successes");
            assert!(current <= 64, "rate must never exceed the ceiling");
            previous = current;
        }
        assert_eq!(previous, 64, "sustained successes converge to the ceiling");
    }

    #[tokio::test]
    async fn test_slow_success_counts_as_overload() {
        let limiter = AdaptiveRateLimiter::new(test_config());
        let key = "a:80";

        limiter
            .report_outcome(key, Duration::from_millis(900), false)
            .await;
        assert_eq!(limiter.current_rate(key).await, 8);
    }

    #[tokio::test]
    async fn test_per_target_rates_are_independent() {
        let limiter = AdaptiveRateLimiter::new(test_config());

        for _ in 0..6 {
            limiter.report_outcome("a:80", fast(), true).await;
        }

        assert_eq!(limiter.current_rate("a:80").await, 2);
        assert_eq!(
            limiter.current_rate("b:80").await,
            16,
            "errors on one target must not change another"
        );
    }

    #[tokio::test]
    async fn test_error_resets_success_streak() {
        let limiter = AdaptiveRateLimiter::new(test_config());
        let key = "a:80";

        limiter.report_outcome(key, fast(), false).await;
        limiter.report_outcome(key, fast(), false).await;
        limiter.report_outcome(key, fast(), true).await; // halves to 8
        limiter.report_outcome(key, fast(), false).await;
        limiter.report_outcome(key, fast(), false).await;

        // Two post-error successes are not a full streak
        assert_eq!(limiter.current_rate(key).await, 8);

        limiter.report_outcome(key, fast(), false).await;
        assert_eq!(limiter.current_rate(key).await, 10);
    }

    #[tokio::test]
    async fn test_wait_token_grants_within_burst() {
        let limiter = AdaptiveRateLimiter::new(test_config());
        let cancel = CancellationToken::new();

        for _ in 0..4 {
            let granted = tokio::time::timeout(
                Duration::from_millis(100),
                limiter.wait_token("a:80", &cancel),
            )
            .await;
            assert!(granted.is_ok(), "burst-sized requests are granted promptly");
        }
    }

    #[tokio::test]
    async fn test_wait_token_cancellable() {
        let config = RateLimiterConfig {
            default_rate: 1,
            burst_size: 1,
            ..test_config()
        };
        let limiter = Arc::new(AdaptiveRateLimiter::new(config));
        let cancel = CancellationToken::new();

        // Drain the only token
        limiter.wait_token("a:80", &cancel).await.unwrap();

        let waiter = {
            let limiter = Arc::clone(&limiter);
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.wait_token("a:80", &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("cancelled waiter must unblock")
            .unwrap();
        assert!(matches!(result, Err(ScanError::Cancelled)));
    }
}
