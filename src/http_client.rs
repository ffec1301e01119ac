// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Probe HTTP Client
 * Shared reqwest wrapper handed to vulnerability probes
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use anyhow::{Context, Result};
use reqwest::Client;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::ScanConfig;
use crate::errors::{ScanError, ScanResult};

/// Maximum response body size (10MB) to prevent memory exhaustion
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

const DEFAULT_POOL_IDLE_PER_HOST: usize = 32;

/// Realistic browser User-Agents to avoid trivial blocks
const BROWSER_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

fn rotate_user_agent() -> &'static str {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    let index = COUNTER.fetch_add(1, Ordering::Relaxed) % BROWSER_USER_AGENTS.len();
    BROWSER_USER_AGENTS[index]
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub latency: Duration,
}

/// HTTP client shared by every probe in a run.
///
/// Transport details (TLS, proxy) stay inside this wrapper; probes only see
/// URLs in and `HttpResponse` out, with failures classified into the
/// scheduler's error taxonomy.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    timeout: Duration,
    max_body_size: usize,
    /// Rotate browser UAs per request unless the operator pinned one
    rotate_ua: bool,
}

impl HttpClient {
    pub fn new(config: &ScanConfig, timeout: Duration) -> Result<Self> {
        let mut builder = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(timeout)
            .pool_max_idle_per_host(DEFAULT_POOL_IDLE_PER_HOST)
            .pool_idle_timeout(Duration::from_secs(90))
            .redirect(reqwest::redirect::Policy::limited(5));

        // Dev/testing escape hatch for self-signed certificates only
        if std::env::var("TUTKA_ACCEPT_INVALID_CERTS").as_deref() == Ok("true") {
            debug!("Certificate validation disabled via TUTKA_ACCEPT_INVALID_CERTS");
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(proxy_url) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .with_context(|| format!("Invalid proxy URL: {}", proxy_url))?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build().context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            timeout,
            max_body_size: MAX_BODY_SIZE,
            rotate_ua: config.user_agent == ScanConfig::default().user_agent,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn get(&self, url: &str) -> ScanResult<HttpResponse> {
        self.execute(self.client.get(url)).await
    }

    pub async fn post(&self, url: &str, body: String) -> ScanResult<HttpResponse> {
        self.execute(self.client.post(url).body(body)).await
    }

    pub async fn get_with_headers(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> ScanResult<HttpResponse> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        self.execute(request).await
    }

    async fn execute(&self, mut request: reqwest::RequestBuilder) -> ScanResult<HttpResponse> {
        if self.rotate_ua {
            request = request.header(reqwest::header::USER_AGENT, rotate_user_agent());
        }
        let started = Instant::now();

        let response = request.send().await.map_err(ScanError::from)?;
        let status_code = response.status().as_u16();

        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect();

        let bytes = response.bytes().await.map_err(ScanError::from)?;
        let body = if bytes.len() > self.max_body_size {
            String::from_utf8_lossy(&bytes[..self.max_body_size]).into_owned()
        } else {
            String::from_utf8_lossy(&bytes).into_owned()
        };

        Ok(HttpResponse {
            status_code,
            headers,
            body,
            latency: started.elapsed(),
        })
    }
}
