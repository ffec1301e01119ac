// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Task Scheduler
 * Dispatches (target x module) probes through rate limiting and the
 * worker pool, with explicit requeue-based retries and cancellation
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use futures::future::join_all;
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::errors::ScanResult;
use crate::modules::{ProbeContext, VulnModule};
use crate::rate_limiter::AdaptiveRateLimiter;
use crate::retry::BackoffPolicy;
use crate::shared_state::SharedState;
use crate::types::{ProbeOutcome, ScanAggregate, Target};
use crate::worker_pool::DynamicWorkerPool;

/// One (target, module) probe attempt.
///
/// Lives in exactly one of {queued, in-flight, completed} at any time: it is
/// owned by the queue, then by the executing worker, and is dropped once a
/// terminal outcome is recorded or requeued as a fresh attempt.
pub struct ScanTask {
    pub target: Arc<Target>,
    pub module: Arc<dyn VulnModule>,
    pub attempt: u32,
    pub created_at: Instant,
}

/// Retry-queued task with its not-before timestamp.
struct DelayedTask {
    ready_at: Instant,
    task: ScanTask,
}

impl PartialEq for DelayedTask {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at
    }
}

impl Eq for DelayedTask {}

impl PartialOrd for DelayedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; invert so the earliest deadline pops first
        other.ready_at.cmp(&self.ready_at)
    }
}

struct TaskQueue {
    ready: VecDeque<ScanTask>,
    delayed: BinaryHeap<DelayedTask>,
    /// Tasks that have not yet reached a terminal state
    open: usize,
}

/// Adaptive concurrent scan scheduler.
///
/// Per task: queued -> rate-limited-wait -> slot-wait -> in-flight ->
/// {completed, retry-queued, abandoned}. Tasks across targets interleave
/// freely; the only ordering promise is that every enumerated task reaches
/// completed or abandoned exactly once.
pub struct TaskScheduler {
    config: SchedulerConfig,
    queue: Mutex<TaskQueue>,
    queue_notify: Notify,
    pool: Arc<DynamicWorkerPool>,
    limiter: Arc<AdaptiveRateLimiter>,
    state: Arc<SharedState>,
    ctx: ProbeContext,
    backoff: BackoffPolicy,
    cancel: CancellationToken,
}

impl TaskScheduler {
    pub fn new(
        config: SchedulerConfig,
        pool: Arc<DynamicWorkerPool>,
        limiter: Arc<AdaptiveRateLimiter>,
        state: Arc<SharedState>,
        ctx: ProbeContext,
    ) -> Arc<Self> {
        let cancel = CancellationToken::new();
        let backoff = BackoffPolicy::from_config(&config);
        let ctx = ProbeContext {
            cancel: cancel.clone(),
            max_duration: config.per_task_timeout(),
            ..ctx
        };

        Arc::new(Self {
            config,
            queue: Mutex::new(TaskQueue {
                ready: VecDeque::new(),
                delayed: BinaryHeap::new(),
                open: 0,
            }),
            queue_notify: Notify::new(),
            pool,
            limiter,
            state,
            ctx,
            backoff,
            cancel,
        })
    }

    /// Token external callers cancel to abort the run.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn shared_state(&self) -> &Arc<SharedState> {
        &self.state
    }

    /// Run the full targets x modules cross product to completion.
    ///
    /// Returns once every enumerated task is terminal or the run was
    /// cancelled; the returned aggregate accounts for every task either way.
    pub async fn run(
        self: &Arc<Self>,
        targets: Vec<Target>,
        modules: Vec<Arc<dyn VulnModule>>,
    ) -> ScanResult<ScanAggregate> {
        let total = (targets.len() * modules.len()) as u64;
        self.state.set_total_tasks(total);
        info!(
            "Scan run: {} targets x {} modules = {} tasks",
            targets.len(),
            modules.len(),
            total
        );

        let targets: Vec<Arc<Target>> = targets.into_iter().map(Arc::new).collect();
        let live_targets = if self.ctx.config.check_alive {
            self.preflight(targets, &modules).await
        } else {
            targets
        };

        let now = Instant::now();
        let task_count = {
            let mut queue = self.queue.lock();
            for target in &live_targets {
                for module in &modules {
                    queue.ready.push_back(ScanTask {
                        target: Arc::clone(target),
                        module: Arc::clone(module),
                        attempt: 0,
                        created_at: now,
                    });
                }
            }
            queue.open = queue.ready.len();
            queue.open
        };

        if task_count > 0 {
            let worker_count = self.config.max_workers.min(task_count).max(1);
            debug!("Spawning {} scheduler workers", worker_count);

            let workers: Vec<_> = (0..worker_count)
                .map(|id| {
                    let scheduler = Arc::clone(self);
                    tokio::spawn(async move { scheduler.worker_loop(id).await })
                })
                .collect();

            join_all(workers).await;
        }

        // Anything still queued was short-circuited by cancellation
        let drained = {
            let mut queue = self.queue.lock();
            let remaining = queue.ready.len() + queue.delayed.len();
            queue.ready.clear();
            queue.delayed.clear();
            queue.open -= remaining;
            remaining as u64
        };

        if self.cancel.is_cancelled() {
            self.state.record_cancelled_batch(drained);
            self.state.mark_run_cancelled();
            warn!("Scan cancelled; {} queued tasks abandoned without dispatch", drained);
        }

        let aggregate = self.state.snapshot().await;
        info!(
            "Scan finished: {} completed, {} abandoned, {} findings",
            aggregate.total_completed, aggregate.total_abandoned, aggregate.total_findings
        );
        Ok(aggregate)
    }

    /// Liveness pre-flight. Dead targets have every module task abandoned
    /// up front instead of burning retries per module.
    async fn preflight(
        &self,
        targets: Vec<Arc<Target>>,
        modules: &[Arc<dyn VulnModule>],
    ) -> Vec<Arc<Target>> {
        let checks = targets.into_iter().map(|target| async move {
            let alive = match self.ctx.http.get(&target.origin()).await {
                // Any HTTP response proves the listener is there
                Ok(_) => true,
                Err(e) => {
                    debug!("Liveness check failed for {}: {}", target, e);
                    false
                }
            };
            (target, alive)
        });

        let mut live = Vec::new();
        for (target, alive) in join_all(checks).await {
            if alive {
                live.push(target);
            } else {
                warn!("Target {} is unreachable; skipping {} modules", target, modules.len());
                for module in modules {
                    self.state
                        .record(
                            &ProbeOutcome::FatalError("target unreachable".to_string()),
                            &target,
                            &module.metadata().name,
                        )
                        .await;
                }
            }
        }
        live
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        debug!("Scheduler worker {} started", worker_id);
        loop {
            let task = match self.next_task().await {
                Some(task) => task,
                None => break,
            };
            self.execute(task).await;
        }
        debug!("Scheduler worker {} stopped", worker_id);
    }

    /// Pull the next ready task, promoting due retries. Returns None once
    /// every task is terminal or the run is cancelled.
    async fn next_task(&self) -> Option<ScanTask> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }

            // Register for wakeups before the check so a requeue between
            // unlock and await cannot be missed
            let notified = self.queue_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_deadline = {
                let mut queue = self.queue.lock();
                let now = Instant::now();

                while let Some(delayed) = queue.delayed.peek() {
                    if delayed.ready_at <= now {
                        let promoted = queue.delayed.pop().expect("peeked entry exists");
                        queue.ready.push_back(promoted.task);
                    } else {
                        break;
                    }
                }

                if let Some(task) = queue.ready.pop_front() {
                    return Some(task);
                }
                if queue.open == 0 {
                    return None;
                }
                queue.delayed.peek().map(|d| d.ready_at)
            };

            match next_deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return None,
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {}
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return None,
                        _ = &mut notified => {}
                    }
                }
            }
        }
    }

    /// Drive one task through rate-limited-wait, slot-wait and in-flight.
    async fn execute(&self, task: ScanTask) {
        let key = task.target.key();

        // rate-limited-wait
        if self
            .limiter
            .wait_token(&key, &self.cancel)
            .await
            .is_err()
        {
            // Cancelled mid-wait; hand the task back so the final drain
            // accounts for it
            self.queue.lock().ready.push_back(task);
            return;
        }

        // slot-wait
        let slot = match self.pool.acquire_slot(&self.cancel).await {
            Ok(slot) => slot,
            Err(_) => {
                self.queue.lock().ready.push_back(task);
                return;
            }
        };

        // in-flight
        self.state.mark_dispatched();
        let probe_cancel = self.cancel.child_token();
        let probe_ctx = self.ctx.probe_scoped(probe_cancel.clone());
        let module_name = task.module.metadata().name.clone();
        let started = Instant::now();

        let outcome = match tokio::time::timeout(
            self.config.per_task_timeout(),
            task.module.probe(&task.target, &probe_ctx),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                probe_cancel.cancel();
                ProbeOutcome::TimedOut
            }
        };

        let latency = started.elapsed();
        slot.release();

        self.limiter
            .report_outcome(&key, latency, outcome.is_error())
            .await;

        if outcome.is_retryable() && task.attempt < self.config.max_retries {
            self.state.note_target_error(&key).await;
            let attempt = task.attempt + 1;
            let delay = self.backoff.delay_for(attempt);
            debug!(
                attempt = attempt,
                max_retries = self.config.max_retries,
                backoff_ms = delay.as_millis() as u64,
                outcome = outcome.label(),
                "Retry queued for {} {}",
                task.target,
                module_name
            );
            self.requeue(ScanTask { attempt, ..task }, delay);
            return;
        }

        self.state.record(&outcome, &task.target, &module_name).await;
        self.task_done();
    }

    fn requeue(&self, task: ScanTask, delay: Duration) {
        let ready_at = Instant::now() + delay;
        self.queue.lock().delayed.push(DelayedTask { ready_at, task });
        self.queue_notify.notify_waiters();
    }

    fn task_done(&self) {
        let open = {
            let mut queue = self.queue.lock();
            queue.open -= 1;
            queue.open
        };
        if open == 0 {
            self.queue_notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delayed_tasks_pop_earliest_first() {
        use crate::modules::{ModuleCategory, ModuleMetadata, RiskLevel};
        use crate::types::Scheme;
        use async_trait::async_trait;

        struct Noop(ModuleMetadata);

        #[async_trait]
        impl VulnModule for Noop {
            fn metadata(&self) -> &ModuleMetadata {
                &self.0
            }
            async fn probe(&self, _: &Target, _: &ProbeContext) -> ProbeOutcome {
                ProbeOutcome::Clean
            }
        }

        let module: Arc<dyn VulnModule> = Arc::new(Noop(ModuleMetadata {
            name: "noop".into(),
            display_name: "Noop".into(),
            category: ModuleCategory::Misconfiguration,
            risk_level: RiskLevel::Low,
            default_enabled: true,
        }));
        let target = Arc::new(Target {
            scheme: Scheme::Http,
            host: "a".into(),
            port: 80,
            path_prefix: String::new(),
        });

        let now = Instant::now();
        let mk = |offset_ms: u64| DelayedTask {
            ready_at: now + Duration::from_millis(offset_ms),
            task: ScanTask {
                target: Arc::clone(&target),
                module: Arc::clone(&module),
                attempt: 1,
                created_at: now,
            },
        };

        let mut heap = BinaryHeap::new();
        heap.push(mk(300));
        heap.push(mk(100));
        heap.push(mk(200));

        let first = heap.pop().unwrap();
        let second = heap.pop().unwrap();
        let third = heap.pop().unwrap();
        assert!(first.ready_at < second.ready_at);
        assert!(second.ready_at < third.ready_at);
    }
}
