// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

use anyhow::{bail, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use tutka_scanner::config::{ScanConfig, SchedulerConfig};
use tutka_scanner::http_client::HttpClient;
use tutka_scanner::modules::{ModuleRegistry, ProbeContext};
use tutka_scanner::oob::CallbackCorrelator;
use tutka_scanner::rate_limiter::{AdaptiveRateLimiter, RateLimiterConfig};
use tutka_scanner::reporting::{self, ScanReport};
use tutka_scanner::resource_monitor::ResourceMonitor;
use tutka_scanner::scheduler::TaskScheduler;
use tutka_scanner::shared_state::SharedState;
use tutka_scanner::targets::{FileProvider, SingleUrlProvider, TargetProvider};
use tutka_scanner::worker_pool::{DynamicWorkerPool, PoolConfig};

#[derive(Parser, Debug)]
#[command(name = "tutka", version, about = "Tutka - adaptive vulnerability scan scheduler")]
struct Cli {
    /// Single target URL
    #[arg(short = 'u', long)]
    url: Option<String>,

    /// File with one target URL per line
    #[arg(short = 'f', long)]
    file: Option<PathBuf>,

    /// Module names to run (default: all default-enabled modules)
    #[arg(short = 'm', long, value_delimiter = ',')]
    modules: Vec<String>,

    /// Initial worker count
    #[arg(short = 't', long)]
    threads: Option<usize>,

    /// Per-task timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Max retries for transient failures
    #[arg(long)]
    max_retries: Option<u32>,

    /// Default per-target request rate (req/s)
    #[arg(long)]
    rate: Option<u32>,

    /// Skip the pre-flight liveness check
    #[arg(long)]
    no_check: bool,

    /// Allow loopback and private-network targets
    #[arg(long)]
    allow_private: bool,

    /// Write JSON report here
    #[arg(long)]
    output_json: Option<PathBuf>,

    /// Write text report here
    #[arg(long)]
    output_text: Option<PathBuf>,
}

const BANNER: &str = r#"
  _____      _   _
 |_   _|   _| |_| | ____ _
   | || | | | __| |/ / _` |
   | || |_| | |_|   < (_| |
   |_| \__,_|\__|_|\_\__,_|
"#;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    print!("\x1b[92m{}\x1b[0m", BANNER);
    println!("        Adaptive Scan Scheduler v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("tutka-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let mut scheduler_config = SchedulerConfig::from_env()?;
    if let Some(threads) = cli.threads {
        scheduler_config.worker_hint = threads;
    }
    if let Some(timeout) = cli.timeout {
        scheduler_config.per_task_timeout_secs = timeout;
    }
    if let Some(max_retries) = cli.max_retries {
        scheduler_config.max_retries = max_retries;
    }
    if let Some(rate) = cli.rate {
        scheduler_config.default_rate_per_target =
            rate.clamp(scheduler_config.rate_floor, scheduler_config.rate_ceiling);
    }
    scheduler_config.validate_consistency()?;

    let mut scan_config = ScanConfig::from_env()?;
    if cli.no_check {
        scan_config.check_alive = false;
    }
    if cli.allow_private {
        scan_config.allow_private_targets = true;
    }
    let scan_config = Arc::new(scan_config);

    // Target intake
    let provider: Box<dyn TargetProvider> = match (&cli.url, &cli.file) {
        (Some(input), None) => Box::new(SingleUrlProvider {
            input: input.clone(),
            allow_private: scan_config.allow_private_targets,
        }),
        (None, Some(path)) => Box::new(FileProvider {
            path: path.clone(),
            allow_private: scan_config.allow_private_targets,
        }),
        (Some(_), Some(_)) => bail!("pass either --url or --file, not both"),
        (None, None) => bail!("a target is required: --url or --file"),
    };
    let targets = provider.targets()?;
    info!("Loaded {} target(s)", targets.len());

    // Module selection. The signature catalog registers itself here; an
    // empty registry means this build shipped without one.
    let registry = ModuleRegistry::new();
    let modules = if cli.modules.is_empty() {
        registry.default_enabled()
    } else {
        registry
            .select(&cli.modules)
            .map_err(|e| anyhow::anyhow!(e))?
    };
    if modules.is_empty() {
        warn!("No vulnerability modules available in this build; nothing to scan");
        return Ok(());
    }
    info!("Selected {} module(s)", modules.len());

    // Core components
    let http = Arc::new(HttpClient::new(
        &scan_config,
        scheduler_config.per_task_timeout(),
    )?);
    let callbacks = Arc::new(CallbackCorrelator::new(scan_config.callback_domain.clone()));
    let state = SharedState::new(Arc::clone(&callbacks));
    let pool = DynamicWorkerPool::new(PoolConfig::from_scheduler(&scheduler_config));
    let limiter = Arc::new(AdaptiveRateLimiter::new(RateLimiterConfig::from_scheduler(
        &scheduler_config,
    )));

    let ctx = ProbeContext {
        http,
        config: Arc::clone(&scan_config),
        callbacks,
        cancel: tokio_util::sync::CancellationToken::new(),
        max_duration: scheduler_config.per_task_timeout(),
    };

    let sample_interval = scheduler_config.sample_interval();
    let scheduler = TaskScheduler::new(
        scheduler_config,
        Arc::clone(&pool),
        limiter,
        Arc::clone(&state),
        ctx,
    );
    let cancel = scheduler.cancel_token();

    // Ctrl-C aborts the run; in-flight probes stop at their timeout
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling scan");
                cancel.cancel();
            }
        });
    }

    let monitor = Arc::new(ResourceMonitor::new());
    let monitor_handle = monitor.spawn(sample_interval, pool, cancel.clone());
    let progress_handle = reporting::spawn_progress_logger(
        Arc::clone(&state),
        Duration::from_secs(10),
        cancel.clone(),
    );

    let started_at = Utc::now();
    let aggregate = scheduler.run(targets, modules).await?;

    cancel.cancel();
    monitor_handle.abort();
    progress_handle.abort();

    let report = ScanReport::new(started_at, aggregate.clone(), state.findings().await);
    if let Some(path) = cli.output_json.as_deref().or(scan_config
        .output_json
        .as_ref()
        .map(std::path::Path::new))
    {
        reporting::export_json(&report, path)?;
    }
    if let Some(path) = cli.output_text.as_deref().or(scan_config
        .output_text
        .as_ref()
        .map(std::path::Path::new))
    {
        reporting::export_text(&report, path)?;
    }

    println!();
    println!(
        "Done: {} completed, {} abandoned, {} findings{}",
        aggregate.total_completed,
        aggregate.total_abandoned,
        aggregate.total_findings,
        if aggregate.cancelled { " (cancelled)" } else { "" }
    );

    Ok(())
}
