// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Shared Scan State
 * Race-free counters, findings accumulation and callback correlation
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::oob::CallbackCorrelator;
use crate::types::{Finding, ProbeOutcome, ScanAggregate, Target};

/// Thread-safe state shared by every worker in a scan run.
///
/// Passed explicitly to the scheduler and reporters; never ambient. Counters
/// are atomics, findings are append-only under one lock, and per-target
/// error counts live behind their own atomic cells so unrelated targets
/// never contend.
pub struct SharedState {
    total_tasks: AtomicU64,
    dispatched: AtomicU64,
    completed: AtomicU64,
    abandoned: AtomicU64,
    findings_count: AtomicU64,
    cancelled: AtomicBool,

    /// Arrival-ordered; duplicates across retries are kept on purpose so a
    /// double report stays visible to the consumer
    findings: Mutex<Vec<Finding>>,

    target_errors: RwLock<HashMap<String, Arc<AtomicU64>>>,

    callbacks: Arc<CallbackCorrelator>,
}

impl SharedState {
    pub fn new(callbacks: Arc<CallbackCorrelator>) -> Arc<Self> {
        Arc::new(Self {
            total_tasks: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
            findings_count: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            findings: Mutex::new(Vec::new()),
            target_errors: RwLock::new(HashMap::new()),
            callbacks,
        })
    }

    pub fn callbacks(&self) -> &Arc<CallbackCorrelator> {
        &self.callbacks
    }

    /// Fix the enumerated task count for this run.
    pub fn set_total_tasks(&self, total: u64) {
        self.total_tasks.store(total, Ordering::Release);
    }

    pub fn mark_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a terminal probe outcome. The single mutation entry point for
    /// task results; safe under arbitrary concurrent callers.
    pub async fn record(&self, outcome: &ProbeOutcome, target: &Target, module: &str) {
        match outcome {
            ProbeOutcome::Clean => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                debug!("Probe clean: {} {}", target, module);
            }
            ProbeOutcome::Vulnerable(evidence) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                self.findings_count.fetch_add(1, Ordering::Relaxed);
                info!(
                    "[VULNERABLE] {} {} - {}",
                    target, module, evidence.summary
                );
                self.findings.lock().await.push(Finding {
                    target: target.to_string(),
                    module: module.to_string(),
                    evidence: evidence.clone(),
                    discovered_at: Utc::now(),
                });
            }
            ProbeOutcome::TransientError(_)
            | ProbeOutcome::FatalError(_)
            | ProbeOutcome::TimedOut => {
                self.abandoned.fetch_add(1, Ordering::Relaxed);
                self.note_target_error(&target.key()).await;
                debug!(
                    "Task abandoned: {} {} ({})",
                    target,
                    module,
                    outcome.label()
                );
            }
        }
    }

    /// Count an error against a target without recording a terminal outcome
    /// (retried transient failures).
    pub async fn note_target_error(&self, target_key: &str) {
        {
            let errors = self.target_errors.read().await;
            if let Some(counter) = errors.get(target_key) {
                counter.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        let mut errors = self.target_errors.write().await;
        errors
            .entry(target_key.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Account queued tasks short-circuited by cancellation. No individual
    /// records beyond the run-level marker.
    pub fn record_cancelled_batch(&self, count: u64) {
        if count > 0 {
            self.abandoned.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn mark_run_cancelled(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_run_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Consistent point-in-time copy of the run counters.
    pub async fn snapshot(&self) -> ScanAggregate {
        let per_target_errors = {
            let errors = self.target_errors.read().await;
            errors
                .iter()
                .map(|(key, counter)| (key.clone(), counter.load(Ordering::Relaxed)))
                .collect()
        };

        ScanAggregate {
            total_tasks: self.total_tasks.load(Ordering::Acquire),
            total_dispatched: self.dispatched.load(Ordering::Relaxed),
            total_completed: self.completed.load(Ordering::Relaxed),
            total_abandoned: self.abandoned.load(Ordering::Relaxed),
            total_findings: self.findings_count.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Acquire),
            per_target_errors,
        }
    }

    /// Arrival-ordered copy of all findings so far.
    pub async fn findings(&self) -> Vec<Finding> {
        self.findings.lock().await.clone()
    }
}
