//! Worldline runner binary.
//!
//! # Usage
//!
//! ```bash
//! # Run a scenario for two minutes, starting now
//! worldline-runner --id alice --contact-dir contacts --scenario alice.json \
//!     --out alice.trace --duration 120
//!
//! # Start every host of a test bed at the same agreed instant
//! worldline-runner --id bob --contact-dir contacts --scenario bob.json \
//!     --out bob.trace --time-start 1700000000
//! ```

use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use worldline_core::{DEFAULT_JOIN_ATTEMPTS, DEFAULT_JOIN_RETRY_INTERVAL, EngineConfig};
use worldline_harness::SimHost;
use worldline_runner::{DEFAULT_DURATION_SECS, RunnerConfig, SystemEnv};

/// Worldline scenario runner
#[derive(Parser, Debug)]
#[command(name = "worldline-runner")]
#[command(about = "Drives a host through a timed world scenario and writes its trace")]
#[command(version)]
struct Args {
    /// Local host id
    #[arg(long)]
    id: String,

    /// Directory of peer contact artifacts
    #[arg(long)]
    contact_dir: PathBuf,

    /// Scenario file (JSON array of steps)
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Trace output file
    #[arg(long)]
    out: PathBuf,

    /// Window start in Unix seconds (default: now)
    #[arg(long)]
    time_start: Option<u64>,

    /// Window length in seconds
    #[arg(long, default_value_t = DEFAULT_DURATION_SECS)]
    duration: u64,

    /// Join attempts per join step
    #[arg(long, default_value_t = DEFAULT_JOIN_ATTEMPTS)]
    join_attempts: u32,

    /// Milliseconds between join attempts
    #[arg(long, default_value_t = u64::try_from(DEFAULT_JOIN_RETRY_INTERVAL.as_millis()).unwrap_or(100))]
    join_retry_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> RunnerConfig {
        RunnerConfig {
            id: self.id,
            contact_dir: self.contact_dir,
            scenario: self.scenario,
            out: self.out,
            time_start: self.time_start,
            duration: Duration::from_secs(self.duration),
            engine: EngineConfig {
                join_attempts: self.join_attempts,
                join_retry_interval: Duration::from_millis(self.join_retry_ms),
                ..EngineConfig::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(std::io::stderr)).with(filter).init();

    let config = args.into_config();
    tracing::info!(id = %config.id, "worldline runner starting");

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    tracing::warn!("received Ctrl+C, stopping scenario");
                    cancel.cancel();
                },
                Err(e) => tracing::error!(error = %e, "failed to install Ctrl+C handler"),
            }
        }
    });

    let host = Arc::new(SimHost::loopback(config.id.clone()));

    match worldline_runner::run(&config, host, SystemEnv::new(), cancel).await {
        Ok(report) => {
            if let Some(session) = report.dangling_world {
                tracing::info!(%session, "scenario ended while holding a world");
            }
            ExitCode::SUCCESS
        },
        Err(e) if !e.is_fatal() => {
            tracing::warn!(error = %e, "scenario finished with errors");
            ExitCode::SUCCESS
        },
        Err(e) => {
            tracing::error!(error = %e, "scenario run failed");
            ExitCode::FAILURE
        },
    }
}
