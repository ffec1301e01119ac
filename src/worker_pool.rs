// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Dynamic Worker Pool
 * Resizable concurrency slots driven by resource headroom
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::errors::{ScanError, ScanResult};
use crate::resource_monitor::ResourceSample;

/// Worker pool tuning knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub initial_capacity: usize,
    pub min_capacity: usize,
    pub max_capacity: usize,
    pub high_water_cpu: f32,
    pub high_water_mem: f32,
    pub low_water_cpu: f32,
    pub low_water_mem: f32,
    /// Consecutive directional samples required before capacity moves
    pub hysteresis_samples: u32,
    /// Capacity change per resize decision
    pub resize_step: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 10,
            min_capacity: 2,
            max_capacity: 50,
            high_water_cpu: 85.0,
            high_water_mem: 85.0,
            low_water_cpu: 50.0,
            low_water_mem: 50.0,
            hysteresis_samples: 3,
            resize_step: 2,
        }
    }
}

impl PoolConfig {
    pub fn from_scheduler(config: &crate::config::SchedulerConfig) -> Self {
        Self {
            initial_capacity: config
                .worker_hint
                .clamp(config.min_workers, config.max_workers),
            min_capacity: config.min_workers,
            max_capacity: config.max_workers,
            high_water_cpu: config.high_water_cpu,
            high_water_mem: config.high_water_mem,
            low_water_cpu: config.low_water_cpu,
            low_water_mem: config.low_water_mem,
            hysteresis_samples: config.hysteresis_samples,
            resize_step: config.resize_step,
        }
    }
}

/// Snapshot of pool accounting, for progress reporting and tests.
#[derive(Debug, Clone, Copy)]
pub struct PoolState {
    pub capacity: usize,
    pub active: usize,
    pub target_capacity: usize,
}

#[derive(Debug)]
struct Counters {
    capacity: usize,
    active: usize,
    target_capacity: usize,
}

#[derive(Debug, Default)]
struct Trend {
    favorable: u32,
    unfavorable: u32,
}

struct PoolInner {
    config: PoolConfig,
    counters: Mutex<Counters>,
    trend: Mutex<Trend>,
    notify: Notify,
}

/// A resizable pool of concurrent execution slots.
///
/// Acquisition blocks cooperatively until a slot frees or the run is
/// cancelled. Shrinking only lowers the ceiling for future acquisitions;
/// in-flight work is never preempted.
pub struct DynamicWorkerPool {
    inner: Arc<PoolInner>,
}

/// An acquired execution slot. Dropping it releases the slot.
pub struct PoolSlot {
    inner: Arc<PoolInner>,
    released: bool,
}

impl PoolSlot {
    /// Explicit release; equivalent to dropping the slot.
    pub fn release(mut self) {
        self.do_release();
    }

    fn do_release(&mut self) {
        if self.released {
            // Unreachable through the public API; the accounting check in
            // release_slot covers foreign bugs
            error!("Worker slot released twice");
            return;
        }
        self.released = true;
        self.inner.release_slot();
    }
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        if !self.released {
            self.do_release();
        }
    }
}

impl PoolInner {
    fn release_slot(&self) {
        {
            let mut counters = self.counters.lock();
            if counters.active == 0 {
                // Accounting is corrupt; report loudly instead of wrapping
                error!("Slot release with zero active slots: double release");
                debug_assert!(false, "double slot release");
                return;
            }
            counters.active -= 1;
        }
        self.notify.notify_waiters();
    }
}

impl DynamicWorkerPool {
    pub fn new(config: PoolConfig) -> Arc<Self> {
        let capacity = config
            .initial_capacity
            .clamp(config.min_capacity, config.max_capacity);

        info!(
            "Worker pool initialized: capacity={} range=[{}, {}]",
            capacity, config.min_capacity, config.max_capacity
        );

        Arc::new(Self {
            inner: Arc::new(PoolInner {
                counters: Mutex::new(Counters {
                    capacity,
                    active: 0,
                    target_capacity: capacity,
                }),
                trend: Mutex::new(Trend::default()),
                notify: Notify::new(),
                config,
            }),
        })
    }

    /// Block until a slot is available or the run is cancelled.
    pub async fn acquire_slot(&self, cancel: &CancellationToken) -> ScanResult<PoolSlot> {
        loop {
            // Register for wakeups before re-checking, so a release between
            // the check and the await cannot be missed
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut counters = self.inner.counters.lock();
                if counters.active < counters.capacity {
                    counters.active += 1;
                    return Ok(PoolSlot {
                        inner: Arc::clone(&self.inner),
                        released: false,
                    });
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ScanError::Cancelled),
                _ = &mut notified => {}
            }
        }
    }

    /// Set a new capacity ceiling, clamped to the configured range.
    ///
    /// Growing wakes blocked acquirers immediately. Shrinking never preempts
    /// active work; the ceiling just stays below the active count until
    /// enough slots drain.
    pub fn resize(&self, target_capacity: usize) {
        let clamped = target_capacity.clamp(
            self.inner.config.min_capacity,
            self.inner.config.max_capacity,
        );

        let grew = {
            let mut counters = self.inner.counters.lock();
            counters.target_capacity = clamped;
            let previous = counters.capacity;
            counters.capacity = clamped;
            clamped > previous
        };

        if grew {
            self.inner.notify.notify_waiters();
        }
    }

    /// Resize decision function, fed by the resource monitor.
    ///
    /// Requires `hysteresis_samples` consecutive samples on one side of the
    /// watermarks before moving, and then moves by one bounded step. Stale
    /// samples skip the cycle entirely.
    pub fn observe_sample(&self, sample: &ResourceSample) {
        if sample.stale {
            return;
        }

        let config = &self.inner.config;
        let overloaded =
            sample.cpu_percent > config.high_water_cpu || sample.mem_percent > config.high_water_mem;
        let idle =
            sample.cpu_percent < config.low_water_cpu && sample.mem_percent < config.low_water_mem;

        let decision = {
            let mut trend = self.inner.trend.lock();
            if overloaded {
                trend.favorable = 0;
                trend.unfavorable += 1;
                if trend.unfavorable >= config.hysteresis_samples {
                    trend.unfavorable = 0;
                    Some(-(config.resize_step as isize))
                } else {
                    None
                }
            } else if idle {
                trend.unfavorable = 0;
                trend.favorable += 1;
                if trend.favorable >= config.hysteresis_samples {
                    trend.favorable = 0;
                    Some(config.resize_step as isize)
                } else {
                    None
                }
            } else {
                trend.favorable = 0;
                trend.unfavorable = 0;
                None
            }
        };

        if let Some(step) = decision {
            let current = self.state().capacity;
            let target = current.saturating_add_signed(step);
            self.resize(target);
            let state = self.state();
            if state.capacity < current {
                info!(
                    "🔻 Reducing worker capacity: {} -> {} (cpu={:.1}% mem={:.1}%)",
                    current, state.capacity, sample.cpu_percent, sample.mem_percent
                );
            } else if state.capacity > current {
                info!(
                    "🔺 Increasing worker capacity: {} -> {} (cpu={:.1}% mem={:.1}%)",
                    current, state.capacity, sample.cpu_percent, sample.mem_percent
                );
            } else {
                debug!("Worker capacity pinned at {} by configured range", current);
            }
        }
    }

    pub fn state(&self) -> PoolState {
        let counters = self.inner.counters.lock();
        PoolState {
            capacity: counters.capacity,
            active: counters.active,
            target_capacity: counters.target_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample(cpu: f32, mem: f32) -> ResourceSample {
        ResourceSample {
            cpu_percent: cpu,
            mem_percent: mem,
            stale: false,
        }
    }

    fn test_config(initial: usize) -> PoolConfig {
        PoolConfig {
            initial_capacity: initial,
            min_capacity: 1,
            max_capacity: 8,
            hysteresis_samples: 3,
            resize_step: 2,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_acquire_respects_capacity() {
        let pool = DynamicWorkerPool::new(test_config(2));
        let cancel = CancellationToken::new();

        let a = pool.acquire_slot(&cancel).await.unwrap();
        let _b = pool.acquire_slot(&cancel).await.unwrap();
        assert_eq!(pool.state().active, 2);

        // Third acquire must block until a slot frees
        let blocked = tokio::time::timeout(Duration::from_millis(50), pool.acquire_slot(&cancel));
        assert!(blocked.await.is_err());

        a.release();
        let c = tokio::time::timeout(Duration::from_millis(200), pool.acquire_slot(&cancel))
            .await
            .expect("released slot should unblock acquirer");
        assert!(c.is_ok());
        assert!(pool.state().active <= pool.state().capacity);
    }

    #[tokio::test]
    async fn test_acquire_unblocks_on_cancel() {
        let pool = DynamicWorkerPool::new(test_config(1));
        let cancel = CancellationToken::new();
        let _held = pool.acquire_slot(&cancel).await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            let cancel = cancel.clone();
            tokio::spawn(async move { pool.acquire_slot(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("cancelled waiter must return promptly")
            .unwrap();
        assert!(matches!(result, Err(ScanError::Cancelled)));
    }

    #[tokio::test]
    async fn test_grow_wakes_waiters() {
        let pool = DynamicWorkerPool::new(test_config(1));
        let cancel = CancellationToken::new();
        let _held = pool.acquire_slot(&cancel).await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            let cancel = cancel.clone();
            tokio::spawn(async move { pool.acquire_slot(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.resize(2);

        let result = tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("grown capacity must unblock waiter")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_shrink_does_not_preempt() {
        let pool = DynamicWorkerPool::new(test_config(4));
        let cancel = CancellationToken::new();

        let _a = pool.acquire_slot(&cancel).await.unwrap();
        let _b = pool.acquire_slot(&cancel).await.unwrap();
        let _c = pool.acquire_slot(&cancel).await.unwrap();

        pool.resize(1);
        let state = pool.state();
        assert_eq!(state.capacity, 1);
        // Active work keeps running above the new ceiling
        assert_eq!(state.active, 3);
    }

    #[tokio::test]
    async fn test_hysteresis_requires_sustained_trend() {
        let pool = DynamicWorkerPool::new(test_config(4));

        pool.observe_sample(&sample(95.0, 50.0));
        pool.observe_sample(&sample(95.0, 50.0));
        assert_eq!(pool.state().capacity, 4, "two samples must not resize yet");

        pool.observe_sample(&sample(95.0, 50.0));
        assert_eq!(pool.state().capacity, 2, "third consecutive sample backs off");

        // A single favorable sample after the unfavorable trend must not
        // immediately grow capacity
        pool.observe_sample(&sample(10.0, 10.0));
        assert_eq!(pool.state().capacity, 2);
    }

    #[tokio::test]
    async fn test_mixed_samples_reset_trend() {
        let pool = DynamicWorkerPool::new(test_config(4));

        pool.observe_sample(&sample(95.0, 50.0));
        pool.observe_sample(&sample(95.0, 50.0));
        pool.observe_sample(&sample(60.0, 60.0)); // between watermarks
        pool.observe_sample(&sample(95.0, 50.0));
        pool.observe_sample(&sample(95.0, 50.0));
        assert_eq!(pool.state().capacity, 4, "trend was interrupted");
    }

    #[tokio::test]
    async fn test_stale_samples_never_resize() {
        let pool = DynamicWorkerPool::new(test_config(4));
        for _ in 0..10 {
            pool.observe_sample(&ResourceSample {
                cpu_percent: 99.0,
                mem_percent: 99.0,
                stale: true,
            });
        }
        assert_eq!(pool.state().capacity, 4);
    }

    #[tokio::test]
    async fn test_capacity_clamped_to_range() {
        let pool = DynamicWorkerPool::new(test_config(2));
        pool.resize(100);
        assert_eq!(pool.state().capacity, 8);
        pool.resize(0);
        assert_eq!(pool.state().capacity, 1);
    }
}
