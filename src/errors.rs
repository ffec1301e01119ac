// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Scheduler Error Types
 * Production-ready error handling with thiserror
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use std::time::Duration;
use thiserror::Error;

/// Scheduler error taxonomy.
///
/// Transient and Timeout are retryable and count against a target's adaptive
/// rate. Fatal surfaces immediately as an abandoned task. Cancelled is the
/// run-level abort and is never recorded per task. SamplingUnavailable stays
/// internal to the resource monitor and must never reach a task result.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Retryable probe failure
    #[error("transient failure for {target}: {reason}")]
    Transient { target: String, reason: String },

    /// Probe exceeded its configured maximum duration
    #[error("probe timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Non-retryable probe failure
    #[error("fatal failure for {target}: {reason}")]
    Fatal { target: String, reason: String },

    /// Run aborted by the caller
    #[error("scan cancelled")]
    Cancelled,

    /// Target rejected before enqueueing
    #[error("invalid target {input}: {reason}")]
    InvalidTarget { input: String, reason: String },

    /// Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    /// CPU/memory sampling failed; absorbed by the resource monitor
    #[error("resource sampling unavailable: {0}")]
    SamplingUnavailable(String),
}

impl ScanError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScanError::Transient { .. } | ScanError::Timeout { .. }
        )
    }
}

/// Classify reqwest errors into the scheduler taxonomy
impl From<reqwest::Error> for ScanError {
    fn from(err: reqwest::Error) -> Self {
        let target = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        if err.is_timeout() {
            ScanError::Timeout {
                duration: Duration::from_secs(0),
            }
        } else if err.is_connect() {
            // Resets and refusals both come back as connect errors here;
            // refusals are unlikely to heal, but one retry is cheap
            ScanError::Transient {
                target,
                reason: err.to_string(),
            }
        } else if err.is_builder() || err.is_request() {
            ScanError::Fatal {
                target,
                reason: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            if matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504) {
                ScanError::Transient {
                    target,
                    reason: format!("HTTP {}", status.as_u16()),
                }
            } else {
                ScanError::Fatal {
                    target,
                    reason: format!("HTTP {}", status.as_u16()),
                }
            }
        } else {
            ScanError::Transient {
                target,
                reason: err.to_string(),
            }
        }
    }
}

/// Result type for scheduler operations
pub type ScanResult<T> = Result<T, ScanError>;
