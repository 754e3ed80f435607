//! Worldline scenario runner.
//!
//! Prepares everything an engine run needs from the file system and then runs
//! one scenario:
//!
//! 1. publish the host's own contact into the contact directory
//! 2. load the scenario file, skipping malformed steps
//! 3. create the trace file
//! 4. run the engine until the window ends or the run is cancelled
//!
//! Any failure before step 4 is returned before a single step executes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod system_env;

use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

pub use error::RunnerError;
pub use system_env::SystemEnv;
use tokio_util::sync::CancellationToken;
use worldline_core::{
    ContactStore, DirContactStore, Engine, EngineConfig, Environment, Host, RunReport, Scenario,
    TraceLog, load_steps, read_scenario_file,
};

/// Default scenario window, in seconds.
pub const DEFAULT_DURATION_SECS: u64 = 60;

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Local host id; the host's contact is published under it.
    pub id: String,
    /// Directory holding every peer's contact artifacts.
    pub contact_dir: PathBuf,
    /// Scenario file. `None` runs an empty scenario.
    pub scenario: Option<PathBuf>,
    /// Trace output file, created or truncated.
    pub out: PathBuf,
    /// Window start in seconds since the Unix epoch. `None` means now.
    pub time_start: Option<u64>,
    /// Window length.
    pub duration: Duration,
    /// Engine tunables.
    pub engine: EngineConfig,
}

impl RunnerConfig {
    /// Configuration with default window and engine settings.
    pub fn new(id: impl Into<String>, contact_dir: impl Into<PathBuf>, out: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            contact_dir: contact_dir.into(),
            scenario: None,
            out: out.into(),
            time_start: None,
            duration: Duration::from_secs(DEFAULT_DURATION_SECS),
            engine: EngineConfig::default(),
        }
    }

    fn resolve_time_start(&self, env: &impl Environment) -> Result<SystemTime, RunnerError> {
        match self.time_start {
            None => Ok(env.wall_clock()),
            Some(secs) => UNIX_EPOCH
                .checked_add(Duration::from_secs(secs))
                .ok_or(RunnerError::TimeStart(secs)),
        }
    }
}

/// Run one scenario against `host`.
///
/// `cancel` stops the run early; the trace is still closed.
pub async fn run<H: Host, E: Environment>(
    config: &RunnerConfig,
    host: Arc<H>,
    env: E,
    cancel: CancellationToken,
) -> Result<RunReport, RunnerError> {
    let time_start = config.resolve_time_start(&env)?;

    let contacts = DirContactStore::new(config.contact_dir.clone());
    contacts.publish(&config.id, &host.local_contact()).await.map_err(RunnerError::Publish)?;
    tracing::info!(id = %config.id, dir = %contacts.root().display(), "published local contact");

    let raw = match &config.scenario {
        Some(path) => read_scenario_file(path).await?,
        None => Vec::new(),
    };
    let loaded = load_steps(&raw);
    if !loaded.skipped.is_empty() {
        tracing::warn!(skipped = loaded.skipped.len(), "scenario has malformed steps");
    }

    let trace = TraceLog::create(env.clone(), &config.out).await?;
    tracing::info!(path = %config.out.display(), "trace file created");

    let scenario = Scenario::new(loaded.steps, time_start, config.duration);
    let engine = Engine::new(host, env, Arc::new(contacts), trace)
        .with_config(config.engine.clone())
        .with_cancel_token(cancel);

    let report = engine.run(&scenario).await?;
    tracing::info!(
        executed = report.timeline.executed,
        failed_joins = report.timeline.failed_joins,
        trace_lines = report.trace_lines,
        worlds = report.worlds_installed,
        "scenario complete"
    );

    Ok(report)
}
