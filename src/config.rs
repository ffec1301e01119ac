// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Tutka Configuration
 * Scheduler tuning knobs and scan-wide settings with env overrides
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use validator::Validate;

use crate::errors::{ScanError, ScanResult};

/// Tuning surface for the adaptive scan scheduler.
///
/// Every control constant lives here rather than in code: backoff
/// multipliers, hysteresis sample counts and watermarks are deployment
/// decisions, not implementation details.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SchedulerConfig {
    /// Initial worker pool size hint; clamped to [min_workers, max_workers]
    #[validate(range(min = 1, max = 10000))]
    #[serde(default = "default_worker_hint")]
    pub worker_hint: usize,

    #[validate(range(min = 1))]
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,

    #[validate(range(min = 1, max = 10000))]
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Requests per second granted to a target with no history
    #[validate(range(min = 1))]
    #[serde(default = "default_rate")]
    pub default_rate_per_target: u32,

    #[validate(range(min = 1))]
    #[serde(default = "default_rate_floor")]
    pub rate_floor: u32,

    #[validate(range(min = 1))]
    #[serde(default = "default_rate_ceiling")]
    pub rate_ceiling: u32,

    /// Token bucket burst cap per target
    #[validate(range(min = 1, max = 256))]
    #[serde(default = "default_burst")]
    pub burst_size: u32,

    /// Additive rate increase applied after a success streak
    #[validate(range(min = 1))]
    #[serde(default = "default_additive_step")]
    pub additive_step: u32,

    /// Multiplicative rate decrease applied on error or slow response
    #[validate(range(min = 0.1, max = 0.9))]
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Latency above this counts as overload even on success
    #[validate(range(min = 1))]
    #[serde(default = "default_latency_threshold_ms")]
    pub latency_threshold_ms: u64,

    /// Consecutive fast successes required before the rate is raised
    #[validate(range(min = 1))]
    #[serde(default = "default_success_streak")]
    pub success_streak: u32,

    #[validate(range(min = 0, max = 10))]
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[validate(range(min = 1, max = 3600))]
    #[serde(default = "default_task_timeout")]
    pub per_task_timeout_secs: u64,

    #[validate(range(min = 100))]
    #[serde(default = "default_sample_interval")]
    pub resource_sample_interval_ms: u64,

    #[validate(range(min = 1.0, max = 100.0))]
    #[serde(default = "default_high_water")]
    pub high_water_cpu: f32,

    #[validate(range(min = 1.0, max = 100.0))]
    #[serde(default = "default_high_water")]
    pub high_water_mem: f32,

    #[validate(range(min = 1.0, max = 100.0))]
    #[serde(default = "default_low_water")]
    pub low_water_cpu: f32,

    #[validate(range(min = 1.0, max = 100.0))]
    #[serde(default = "default_low_water")]
    pub low_water_mem: f32,

    /// Consecutive samples on one side of the watermarks before the pool
    /// changes direction
    #[validate(range(min = 1, max = 100))]
    #[serde(default = "default_hysteresis")]
    pub hysteresis_samples: u32,

    /// Worker count change per resize decision
    #[validate(range(min = 1, max = 64))]
    #[serde(default = "default_resize_step")]
    pub resize_step: usize,

    #[serde(default = "default_retry_initial_backoff")]
    pub retry_initial_backoff_ms: u64,

    #[serde(default = "default_retry_max_backoff")]
    pub retry_max_backoff_ms: u64,

    /// Jitter factor applied to retry backoff (0.0 to 1.0)
    #[validate(range(min = 0.0, max = 1.0))]
    #[serde(default = "default_retry_jitter")]
    pub retry_jitter: f64,
}

fn default_worker_hint() -> usize {
    10
}
fn default_min_workers() -> usize {
    2
}
fn default_max_workers() -> usize {
    50
}
fn default_rate() -> u32 {
    10
}
fn default_rate_floor() -> u32 {
    1
}
fn default_rate_ceiling() -> u32 {
    50
}
fn default_burst() -> u32 {
    5
}
fn default_additive_step() -> u32 {
    1
}
fn default_backoff_multiplier() -> f64 {
    0.5
}
fn default_latency_threshold_ms() -> u64 {
    500
}
fn default_success_streak() -> u32 {
    10
}
fn default_max_retries() -> u32 {
    3
}
fn default_task_timeout() -> u64 {
    10
}
fn default_sample_interval() -> u64 {
    2000
}
fn default_high_water() -> f32 {
    85.0
}
fn default_low_water() -> f32 {
    50.0
}
fn default_hysteresis() -> u32 {
    3
}
fn default_resize_step() -> usize {
    2
}
fn default_retry_initial_backoff() -> u64 {
    500
}
fn default_retry_max_backoff() -> u64 {
    30_000
}
fn default_retry_jitter() -> f64 {
    0.3
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults are valid")
    }
}

impl SchedulerConfig {
    pub fn per_task_timeout(&self) -> Duration {
        Duration::from_secs(self.per_task_timeout_secs)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.resource_sample_interval_ms)
    }

    pub fn latency_threshold(&self) -> Duration {
        Duration::from_millis(self.latency_threshold_ms)
    }

    /// Apply TUTKA_* environment overrides, then validate.
    pub fn from_env() -> ScanResult<Self> {
        let mut config = Self::default();

        if let Some(v) = env_parse::<usize>("TUTKA_WORKERS") {
            config.worker_hint = v;
        }
        if let Some(v) = env_parse::<usize>("TUTKA_MIN_WORKERS") {
            config.min_workers = v;
        }
        if let Some(v) = env_parse::<usize>("TUTKA_MAX_WORKERS") {
            config.max_workers = v;
        }
        if let Some(v) = env_parse::<u32>("TUTKA_RATE") {
            config.default_rate_per_target = v;
        }
        if let Some(v) = env_parse::<u32>("TUTKA_RATE_CEILING") {
            config.rate_ceiling = v;
        }
        if let Some(v) = env_parse::<u32>("TUTKA_MAX_RETRIES") {
            config.max_retries = v;
        }
        if let Some(v) = env_parse::<u64>("TUTKA_TIMEOUT") {
            config.per_task_timeout_secs = v;
        }
        if let Some(v) = env_parse::<u64>("TUTKA_SAMPLE_INTERVAL_MS") {
            config.resource_sample_interval_ms = v;
        }

        config.validate_consistency()?;
        Ok(config)
    }

    pub fn validate_consistency(&self) -> ScanResult<()> {
        self.validate()
            .map_err(|e| ScanError::Configuration(e.to_string()))?;

        if self.min_workers > self.max_workers {
            return Err(ScanError::Configuration(format!(
                "min_workers {} exceeds max_workers {}",
                self.min_workers, self.max_workers
            )));
        }
        if self.rate_floor > self.rate_ceiling {
            return Err(ScanError::Configuration(format!(
                "rate_floor {} exceeds rate_ceiling {}",
                self.rate_floor, self.rate_ceiling
            )));
        }
        if self.default_rate_per_target < self.rate_floor
            || self.default_rate_per_target > self.rate_ceiling
        {
            return Err(ScanError::Configuration(format!(
                "default rate {} outside [{}, {}]",
                self.default_rate_per_target, self.rate_floor, self.rate_ceiling
            )));
        }
        if self.low_water_cpu >= self.high_water_cpu || self.low_water_mem >= self.high_water_mem {
            return Err(ScanError::Configuration(
                "low watermarks must be below high watermarks".to_string(),
            ));
        }
        Ok(())
    }
}

/// Scan-wide settings outside the scheduler core: transport identity,
/// output destinations and credential slots for external collaborators.
///
/// Secret material arrives here already decrypted; the secure-config
/// collaborator owns the cipher.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ScanConfig {
    #[validate(length(min = 1))]
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default)]
    pub proxy: Option<String>,

    #[serde(default)]
    pub extra_headers: HashMap<String, String>,

    /// Pre-flight liveness check before a target's tasks are enqueued
    #[serde(default = "default_true")]
    pub check_alive: bool,

    /// Allow loopback and RFC1918 targets (off by default)
    #[serde(default)]
    pub allow_private_targets: bool,

    #[serde(default)]
    pub output_text: Option<String>,

    #[serde(default)]
    pub output_json: Option<String>,

    /// DNS-log callback domain for out-of-band correlation
    #[serde(default)]
    pub callback_domain: Option<String>,

    #[serde(default)]
    pub ceye_token: Option<String>,

    #[serde(default)]
    pub fofa_key: Option<String>,

    #[serde(default)]
    pub shodan_key: Option<String>,
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/120.0.0.0 Safari/537.36"
        .to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ScanConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("defaults are valid")
    }
}

impl ScanConfig {
    pub fn from_env() -> ScanResult<Self> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("TUTKA_USER_AGENT") {
            config.user_agent = v;
        }
        if let Ok(v) = std::env::var("TUTKA_PROXY") {
            config.proxy = Some(v);
        }
        if let Ok(v) = std::env::var("TUTKA_CALLBACK_DOMAIN") {
            config.callback_domain = Some(v);
        }
        if let Ok(v) = std::env::var("CEYE_TOKEN") {
            config.ceye_token = Some(v);
        }
        if let Ok(v) = std::env::var("FOFA_KEY") {
            config.fofa_key = Some(v);
        }
        if let Ok(v) = std::env::var("SHODAN_KEY") {
            config.shodan_key = Some(v);
        }

        config
            .validate()
            .map_err(|e| ScanError::Configuration(e.to_string()))?;
        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_consistent() {
        let config = SchedulerConfig::default();
        assert!(config.validate_consistency().is_ok());
        assert_eq!(config.max_retries, 3);
        assert!(config.rate_floor <= config.default_rate_per_target);
        assert!(config.default_rate_per_target <= config.rate_ceiling);
    }

    #[test]
    fn test_inverted_watermarks_rejected() {
        let mut config = SchedulerConfig::default();
        config.low_water_cpu = 90.0;
        assert!(config.validate_consistency().is_err());
    }

    #[test]
    fn test_inverted_rate_bounds_rejected() {
        let mut config = SchedulerConfig::default();
        config.rate_floor = 100;
        config.rate_ceiling = 10;
        assert!(config.validate_consistency().is_err());
    }

    #[test]
    fn test_scan_config_defaults() {
        let config = ScanConfig::default();
        assert!(config.check_alive);
        assert!(!config.allow_private_targets);
        assert!(config.user_agent.contains("Mozilla"));
    }
}
