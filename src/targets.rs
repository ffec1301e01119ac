// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Target Intake & Validation
 * URL and target-file parsing with private-network guards
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use once_cell::sync::Lazy;
use regex::Regex;
use std::net::IpAddr;
use std::path::Path;
use tracing::warn;
use url::Url;

use crate::errors::{ScanError, ScanResult};
use crate::types::{Scheme, Target};

/// Fast-reject shape check before full URL parsing
static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i)https?://[a-z0-9\[][a-z0-9.:\-\[\]]*(?::\d{1,5})?(?:/\S*)?$")
        .expect("static pattern compiles")
});

/// Source of scan targets. Discovery backends (FOFA, Shodan) implement this
/// seam in their own crates.
pub trait TargetProvider {
    fn targets(&self) -> ScanResult<Vec<Target>>;
}

pub struct SingleUrlProvider {
    pub input: String,
    pub allow_private: bool,
}

impl TargetProvider for SingleUrlProvider {
    fn targets(&self) -> ScanResult<Vec<Target>> {
        Ok(vec![parse_target(&self.input, self.allow_private)?])
    }
}

/// One target URL per line; blank lines and `#` comments skipped. Invalid
/// lines are logged and dropped rather than failing the whole file.
pub struct FileProvider {
    pub path: std::path::PathBuf,
    pub allow_private: bool,
}

impl TargetProvider for FileProvider {
    fn targets(&self) -> ScanResult<Vec<Target>> {
        load_target_file(&self.path, self.allow_private)
    }
}

/// Parse a user-supplied URL into a scan target.
pub fn parse_target(input: &str, allow_private: bool) -> ScanResult<Target> {
    let trimmed = sanitize_input(input);
    if trimmed.is_empty() {
        return Err(ScanError::InvalidTarget {
            input: input.to_string(),
            reason: "empty target".to_string(),
        });
    }

    if !URL_PATTERN.is_match(&trimmed) {
        return Err(ScanError::InvalidTarget {
            input: trimmed,
            reason: "not an http(s) URL".to_string(),
        });
    }

    let url = Url::parse(&trimmed).map_err(|e| ScanError::InvalidTarget {
        input: trimmed.clone(),
        reason: e.to_string(),
    })?;

    let scheme = match url.scheme() {
        "http" => Scheme::Http,
        "https" => Scheme::Https,
        other => {
            return Err(ScanError::InvalidTarget {
                input: trimmed,
                reason: format!("unsupported scheme '{}'", other),
            })
        }
    };

    let host = url
        .host_str()
        .ok_or_else(|| ScanError::InvalidTarget {
            input: trimmed.clone(),
            reason: "missing host".to_string(),
        })?
        .to_ascii_lowercase();

    if !allow_private && is_private_host(&host) {
        return Err(ScanError::InvalidTarget {
            input: trimmed,
            reason: "private or loopback hosts are disabled".to_string(),
        });
    }

    let port = url.port().unwrap_or_else(|| scheme.default_port());
    let path_prefix = url.path().trim_end_matches('/').to_string();

    Ok(Target {
        scheme,
        host,
        port,
        path_prefix,
    })
}

pub fn load_target_file(path: &Path, allow_private: bool) -> ScanResult<Vec<Target>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ScanError::Configuration(format!("cannot read target file {}: {}", path.display(), e))
    })?;

    let mut targets = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_target(line, allow_private) {
            Ok(target) => targets.push(target),
            Err(e) => warn!(
                "Skipping invalid target at {}:{}: {}",
                path.display(),
                line_no + 1,
                e
            ),
        }
    }

    if targets.is_empty() {
        return Err(ScanError::Configuration(format!(
            "no valid targets in {}",
            path.display()
        )));
    }

    Ok(targets)
}

/// Strip control characters and surrounding whitespace from raw user input.
fn sanitize_input(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !c.is_control())
        .collect()
}

fn is_private_host(host: &str) -> bool {
    if host == "localhost" || host.ends_with(".localhost") || host.ends_with(".local") {
        return true;
    }

    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
        }
        Ok(IpAddr::V6(ip)) => ip.is_loopback() || ip.is_unspecified(),
        Err(_) => false,
    }
}
