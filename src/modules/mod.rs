// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Vulnerability Module Seam
 * Capability trait and registry for the probe catalog
 *
 * The concrete signature catalog ships separately; the scheduler only sees
 * the single probe entry point defined here.
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ScanConfig;
use crate::http_client::HttpClient;
use crate::oob::CallbackCorrelator;
use crate::types::{ProbeOutcome, Target};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ModuleCategory {
    Injection,
    Deserialization,
    AuthBypass,
    PathTraversal,
    InformationDisclosure,
    RemoteCodeExecution,
    Misconfiguration,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Module metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleMetadata {
    /// Stable identifier, e.g. "weblogic_cve_2020_14882"
    pub name: String,
    pub display_name: String,
    pub category: ModuleCategory,
    pub risk_level: RiskLevel,
    pub default_enabled: bool,
}

/// Everything a probe is handed besides its target.
///
/// The cancellation token is a per-probe child of the run token; probes must
/// honor it and `max_duration`, with the scheduler's timeout as backstop.
#[derive(Clone)]
pub struct ProbeContext {
    pub http: Arc<HttpClient>,
    pub config: Arc<ScanConfig>,
    pub callbacks: Arc<CallbackCorrelator>,
    pub cancel: CancellationToken,
    pub max_duration: Duration,
}

impl ProbeContext {
    /// Clone with a fresh child cancellation scope for one probe.
    pub fn probe_scoped(&self, cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..self.clone()
        }
    }
}

/// One vulnerability-check capability.
///
/// Implementations must encode every failure in the returned outcome; a
/// probe that panics or leaks transport errors is a catalog bug.
#[async_trait]
pub trait VulnModule: Send + Sync {
    fn metadata(&self) -> &ModuleMetadata;

    async fn probe(&self, target: &Target, ctx: &ProbeContext) -> ProbeOutcome;
}

/// Registry of available modules, keyed by stable name.
pub struct ModuleRegistry {
    modules: HashMap<String, Arc<dyn VulnModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
        }
    }

    pub fn register(&mut self, module: Arc<dyn VulnModule>) {
        let name = module.metadata().name.clone();
        debug!("Registered module {}", name);
        self.modules.insert(name, module);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn VulnModule>> {
        self.modules.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// All modules marked enabled by default, sorted by name for a stable
    /// enumeration order.
    pub fn default_enabled(&self) -> Vec<Arc<dyn VulnModule>> {
        let mut selected: Vec<_> = self
            .modules
            .values()
            .filter(|m| m.metadata().default_enabled)
            .cloned()
            .collect();
        selected.sort_by(|a, b| a.metadata().name.cmp(&b.metadata().name));
        selected
    }

    /// Resolve an explicit selection; unknown names are an error so a typo
    /// never silently narrows a scan.
    pub fn select(&self, names: &[String]) -> Result<Vec<Arc<dyn VulnModule>>, String> {
        let mut selected = Vec::with_capacity(names.len());
        for name in names {
            match self.get(name) {
                Some(module) => selected.push(module),
                None => return Err(format!("unknown module '{}'", name)),
            }
        }
        Ok(selected)
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticModule {
        meta: ModuleMetadata,
    }

    #[async_trait]
    impl VulnModule for StaticModule {
        fn metadata(&self) -> &ModuleMetadata {
            &self.meta
        }

        async fn probe(&self, _target: &Target, _ctx: &ProbeContext) -> ProbeOutcome {
            ProbeOutcome::Clean
        }
    }

    fn module(name: &str, enabled: bool) -> Arc<dyn VulnModule> {
        Arc::new(StaticModule {
            meta: ModuleMetadata {
                name: name.to_string(),
                display_name: name.to_uppercase(),
                category: ModuleCategory::Injection,
                risk_level: RiskLevel::High,
                default_enabled: enabled,
            },
        })
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ModuleRegistry::new();
        registry.register(module("struts2_ognl", true));

        assert_eq!(registry.len(), 1);
        assert!(registry.get("struts2_ognl").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_default_enabled_is_sorted_and_filtered() {
        let mut registry = ModuleRegistry::new();
        registry.register(module("zeta", true));
        registry.register(module("alpha", true));
        registry.register(module("disabled", false));

        let enabled = registry.default_enabled();
        let names: Vec<_> = enabled.iter().map(|m| m.metadata().name.clone()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_unknown_selection_is_an_error() {
        let mut registry = ModuleRegistry::new();
        registry.register(module("alpha", true));

        assert!(registry.select(&["alpha".to_string()]).is_ok());
        assert!(registry.select(&["alhpa".to_string()]).is_err());
    }
}
