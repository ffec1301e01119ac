// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Scan Reporting
 * Progress snapshots and text/JSON result export
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::shared_state::SharedState;
use crate::types::{Finding, ScanAggregate};

/// Full scan report, the unit both exporters serialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub scan_id: String,
    pub scanner_version: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub aggregate: ScanAggregate,
    pub findings: Vec<Finding>,
}

impl ScanReport {
    pub fn new(
        started_at: DateTime<Utc>,
        aggregate: ScanAggregate,
        findings: Vec<Finding>,
    ) -> Self {
        Self {
            scan_id: uuid::Uuid::new_v4().to_string(),
            scanner_version: env!("CARGO_PKG_VERSION").to_string(),
            started_at,
            completed_at: Utc::now(),
            aggregate,
            findings,
        }
    }
}

/// Write the report as indented JSON.
pub fn export_json(report: &ScanReport, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("cannot create {}", path.display()))?;
    serde_json::to_writer_pretty(file, report).context("JSON serialization failed")?;
    info!("[SUCCESS] JSON report written to {}", path.display());
    Ok(())
}

/// Write the report as a human-readable text summary.
pub fn export_text(report: &ScanReport, path: &Path) -> Result<()> {
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("cannot create {}", path.display()))?;

    writeln!(file, "Tutka scan report v{}", report.scanner_version)?;
    writeln!(file, "Scan id:   {}", report.scan_id)?;
    writeln!(file, "Started:   {}", report.started_at.to_rfc3339())?;
    writeln!(file, "Completed: {}", report.completed_at.to_rfc3339())?;
    writeln!(file)?;

    let agg = &report.aggregate;
    writeln!(file, "Tasks:     {}", agg.total_tasks)?;
    writeln!(file, "Completed: {}", agg.total_completed)?;
    writeln!(file, "Abandoned: {}", agg.total_abandoned)?;
    writeln!(file, "Findings:  {}", agg.total_findings)?;
    if agg.cancelled {
        writeln!(file, "Run was cancelled before completion")?;
    }
    writeln!(file)?;

    if report.findings.is_empty() {
        writeln!(file, "No vulnerabilities detected.")?;
    } else {
        writeln!(file, "Findings (arrival order):")?;
        for finding in &report.findings {
            writeln!(
                file,
                "  [{}] {} {} - {}",
                finding.discovered_at.to_rfc3339(),
                finding.target,
                finding.module,
                finding.evidence.summary
            )?;
        }
    }

    let mut error_targets: Vec<_> = agg.per_target_errors.iter().collect();
    if !error_targets.is_empty() {
        error_targets.sort();
        writeln!(file)?;
        writeln!(file, "Errors per target:")?;
        for (target, count) in error_targets {
            writeln!(file, "  {} - {}", target, count)?;
        }
    }

    info!("[SUCCESS] Text report written to {}", path.display());
    Ok(())
}

/// Periodically log a progress line from shared-state snapshots.
pub fn spawn_progress_logger(
    state: Arc<SharedState>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Progress logger stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let agg = state.snapshot().await;
                    let settled = agg.total_completed + agg.total_abandoned;
                    info!(
                        "Progress: {}/{} tasks settled, {} findings, {} dispatched",
                        settled, agg.total_tasks, agg.total_findings, agg.total_dispatched
                    );
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Evidence;

    fn report() -> ScanReport {
        ScanReport::new(
            Utc::now(),
            ScanAggregate {
                total_tasks: 4,
                total_dispatched: 5,
                total_completed: 3,
                total_abandoned: 1,
                total_findings: 1,
                cancelled: false,
                per_target_errors: [("a:80".to_string(), 2u64)].into_iter().collect(),
            },
            vec![Finding {
                target: "http://a:80".to_string(),
                module: "shiro_deserialize".to_string(),
                evidence: Evidence::new("cookie rememberMe echoed"),
                discovered_at: Utc::now(),
            }],
        )
    }

    #[test]
    fn test_json_round_trip() {
        let dir = std::env::temp_dir();
        let path = dir.join("tutka_report_test.json");

        export_json(&report(), &path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let parsed: ScanReport = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.aggregate.total_findings, 1);
        assert_eq!(parsed.findings.len(), 1);
    }

    #[test]
    fn test_text_report_mentions_findings() {
        let dir = std::env::temp_dir();
        let path = dir.join("tutka_report_test.txt");

        export_text(&report(), &path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert!(raw.contains("shiro_deserialize"));
        assert!(raw.contains("Findings:  1"));
        assert!(raw.contains("a:80 - 2"));
    }
}
