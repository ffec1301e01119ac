// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka Core Types
 * Targets, probe outcomes, findings and aggregate counters
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// One scan endpoint. Immutable once enqueued.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Target {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    /// Path prefix probes append to, normalized without a trailing slash.
    pub path_prefix: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

impl Target {
    /// Stable per-target key used by the rate limiter and error counters.
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Scheme://host:port origin without the path prefix.
    pub fn origin(&self) -> String {
        format!("{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }

    /// Full URL for a probe path relative to the target's prefix.
    pub fn url_for(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            format!("{}{}", self.origin(), self.path_prefix)
        } else {
            format!("{}{}/{}", self.origin(), self.path_prefix, path)
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.origin(), self.path_prefix)
    }
}

/// Evidence attached to a vulnerable probe outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Out-of-band correlation token, when the detection was callback-based
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_token: Option<String>,
}

impl Evidence {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            detail: None,
            callback_token: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Terminal result of one (target, module) probe invocation.
///
/// Produced by the module catalog, consumed by the task scheduler. Probes
/// never panic across this boundary; every failure mode is a variant here.
#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    /// Target responded, signature not present
    Clean,
    /// Signature matched
    Vulnerable(Evidence),
    /// Retryable failure (connection reset, 5xx, ...)
    TransientError(String),
    /// Non-retryable failure (malformed target, protocol mismatch, ...)
    FatalError(String),
    /// Probe exceeded its maximum duration
    TimedOut,
}

impl ProbeOutcome {
    /// Errors count against the target's adaptive rate.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ProbeOutcome::TransientError(_) | ProbeOutcome::FatalError(_) | ProbeOutcome::TimedOut
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProbeOutcome::TransientError(_) | ProbeOutcome::TimedOut
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProbeOutcome::Clean => "clean",
            ProbeOutcome::Vulnerable(_) => "vulnerable",
            ProbeOutcome::TransientError(_) => "transient_error",
            ProbeOutcome::FatalError(_) => "fatal_error",
            ProbeOutcome::TimedOut => "timed_out",
        }
    }
}

/// A confirmed finding, appended in arrival order.
///
/// Duplicates (same target + module reported twice across retries) are kept;
/// deduplication is the consumer's call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub target: String,
    pub module: String,
    pub evidence: Evidence,
    pub discovered_at: DateTime<Utc>,
}

/// Point-in-time copy of the run counters.
///
/// Counts are monotonically non-decreasing for the duration of one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanAggregate {
    /// Tasks enumerated when the run was built (targets x modules)
    pub total_tasks: u64,
    /// Dispatch count; retries re-dispatch, so this can exceed total_tasks
    pub total_dispatched: u64,
    pub total_completed: u64,
    pub total_abandoned: u64,
    pub total_findings: u64,
    /// Run-level cancellation marker
    pub cancelled: bool,
    /// Error count per target key
    pub per_target_errors: HashMap<String, u64>,
}

impl ScanAggregate {
    /// True once every enumerated task reached a terminal state.
    pub fn is_settled(&self) -> bool {
        self.total_completed + self.total_abandoned == self.total_tasks
    }
}
