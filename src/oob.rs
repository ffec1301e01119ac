// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Out-of-Band Callback Correlation
 * Unique probe tokens for matching asynchronous callbacks (DNS-log style)
 *
 * Token format: {module}-{session8}-{random8}.{callback_domain}
 * The callback service itself is an external collaborator; this module only
 * owns the identifier-correlation contract.
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use rand::Rng;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::types::Target;

/// The probe a callback token points back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRef {
    pub target_key: String,
    pub module: String,
}

/// Issues unique per-probe tokens and resolves observed callbacks.
pub struct CallbackCorrelator {
    /// Unique per scan run
    session_id: String,
    callback_domain: Option<String>,
    registrations: RwLock<HashMap<String, ProbeRef>>,
}

impl CallbackCorrelator {
    pub fn new(callback_domain: Option<String>) -> Self {
        let session_id = {
            let mut rng = rand::rng();
            format!("{:016x}", rng.random::<u64>())
        };

        debug!(
            "Callback correlator initialized: session_id={}, domain={:?}",
            session_id, callback_domain
        );

        Self {
            session_id,
            callback_domain,
            registrations: RwLock::new(HashMap::new()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Issue a token for one probe and remember which probe it belongs to.
    pub async fn issue_token(&self, target: &Target, module: &str) -> String {
        let token = {
            let mut rng = rand::rng();
            format!(
                "{}-{}-{:08x}",
                sanitize_label(module),
                &self.session_id[0..8],
                rng.random::<u32>()
            )
        };

        self.registrations.write().await.insert(
            token.clone(),
            ProbeRef {
                target_key: target.key(),
                module: module.to_string(),
            },
        );

        token
    }

    /// DNS name a probe embeds in its payload, when a domain is configured.
    pub fn callback_host(&self, token: &str) -> Option<String> {
        self.callback_domain
            .as_ref()
            .map(|domain| format!("{}.{}", token, domain))
    }

    /// Match an observed callback token back to the probe that planted it.
    ///
    /// The token may arrive as a bare label or as a full DNS name under the
    /// callback domain.
    pub async fn resolve(&self, observed: &str) -> Option<ProbeRef> {
        let token = observed.split('.').next().unwrap_or(observed);
        self.registrations.read().await.get(token).cloned()
    }

    pub async fn registered_count(&self) -> usize {
        self.registrations.read().await.len()
    }
}

/// DNS labels allow alphanumerics and hyphens, max 63 chars.
fn sanitize_label(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .take(24)
        .collect()
}
