// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Resource Monitor
 * Periodic CPU/memory sampling feeding worker pool resize decisions
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::worker_pool::DynamicWorkerPool;

/// One CPU/memory utilization sample.
#[derive(Debug, Clone, Copy)]
pub struct ResourceSample {
    pub cpu_percent: f32,
    pub mem_percent: f32,
    /// Set when sampling failed and these are carried-over values
    pub stale: bool,
}

/// Samples local CPU and memory utilization on a fixed interval.
///
/// Sampling failures degrade to re-reporting the last known values with the
/// stale flag set; the monitor never surfaces an error into the scheduling
/// path and never blocks it.
pub struct ResourceMonitor {
    system: Mutex<System>,
    last: Mutex<Option<ResourceSample>>,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            last: Mutex::new(None),
        }
    }

    /// Take one sample, falling back to the previous one on failure.
    pub fn sample(&self) -> ResourceSample {
        match self.sample_inner() {
            Ok(sample) => {
                *self.last.lock() = Some(sample);
                sample
            }
            Err(reason) => {
                warn!("Resource sampling unavailable: {}", reason);
                let carried = self.last.lock().unwrap_or(ResourceSample {
                    cpu_percent: 0.0,
                    mem_percent: 0.0,
                    stale: true,
                });
                ResourceSample {
                    stale: true,
                    ..carried
                }
            }
        }
    }

    fn sample_inner(&self) -> Result<ResourceSample, String> {
        let mut system = self.system.lock();
        system.refresh_cpu_usage();
        system.refresh_memory();

        let total = system.total_memory();
        if total == 0 {
            return Err("total memory reported as zero".to_string());
        }

        let cpu_percent = system.global_cpu_info().cpu_usage();
        let mem_percent = (system.used_memory() as f64 / total as f64 * 100.0) as f32;

        Ok(ResourceSample {
            cpu_percent,
            mem_percent,
            stale: false,
        })
    }

    /// Spawn the sampling loop. Each tick feeds the pool's resize decision;
    /// stale samples mean "do not resize this cycle".
    pub fn spawn(
        self: Arc<Self>,
        sample_interval: Duration,
        pool: Arc<DynamicWorkerPool>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(sample_interval);
            // First tick fires immediately; skip it so the CPU counters have
            // a delta to measure against
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Resource monitor stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let sample = self.sample();
                        debug!(
                            cpu = sample.cpu_percent as f64,
                            mem = sample.mem_percent as f64,
                            stale = sample.stale,
                            "Resource sample"
                        );
                        pool.observe_sample(&sample);
                    }
                }
            }
        })
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}
