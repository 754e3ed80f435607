//! Engine: wires the timeline and the event consumer together.
//!
//! ```text
//!                 ┌──────────────────┐
//!   Scenario ───► │ TimelineExecutor │ ──┐  host calls
//!                 └────────┬─────────┘   │
//!                          │ lock        ▼
//!                   SharedSession      Host ──► EventStream
//!                          │ lock        ▲           │
//!                 ┌────────┴─────────┐   │           │
//!                 │  EventConsumer   │ ◄─┴───────────┘
//!                 └──────────────────┘
//!                both write ──► TraceLog
//! ```
//!
//! The consumer runs as a spawned task; the timeline runs on the caller's task.
//! The two never call each other.

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{
    consumer::{ConsumerReport, EventConsumer},
    contact::ContactStore,
    env::Environment,
    error::EngineError,
    host::{Host, SessionId},
    scenario::Scenario,
    session::SharedSession,
    timeline::{TimelineExecutor, TimelineReport},
    trace::TraceLog,
};

/// Attempts made by a join step before it is abandoned.
pub const DEFAULT_JOIN_ATTEMPTS: u32 = 100;

/// Spacing between join attempts.
pub const DEFAULT_JOIN_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// World path used for joining and exposing worlds.
pub const DEFAULT_WORLD_PATH: &str = "/";

/// Resource locator of worlds opened by the scenario.
pub const DEFAULT_WORLD_URL: &str = "https://www.example.com";

/// Engine tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Join attempts per join step.
    pub join_attempts: u32,
    /// Pause between join attempts.
    pub join_retry_interval: Duration,
    /// Path passed to `join_world`.
    pub join_path: String,
    /// Path at which entered worlds are exposed.
    pub expose_path: String,
    /// Locator passed to `open_world`.
    pub world_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            join_attempts: DEFAULT_JOIN_ATTEMPTS,
            join_retry_interval: DEFAULT_JOIN_RETRY_INTERVAL,
            join_path: DEFAULT_WORLD_PATH.to_string(),
            expose_path: DEFAULT_WORLD_PATH.to_string(),
            world_url: DEFAULT_WORLD_URL.to_string(),
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Timeline summary.
    pub timeline: TimelineReport,
    /// Event consumer summary.
    pub consumer: ConsumerReport,
    /// Trace lines written.
    pub trace_lines: u64,
    /// Worlds opened or joined over the run.
    pub worlds_installed: u64,
    /// World still held when the run ended. Expected to be `None`.
    pub dangling_world: Option<SessionId>,
}

/// Scenario engine for one host.
pub struct Engine<H: Host, E: Environment> {
    host: Arc<H>,
    env: E,
    contacts: Arc<dyn ContactStore>,
    trace: Arc<TraceLog<E>>,
    session: SharedSession<H::World>,
    config: EngineConfig,
    cancel: CancellationToken,
}

impl<H: Host, E: Environment> Engine<H, E> {
    /// Create an engine with the default configuration.
    pub fn new(host: Arc<H>, env: E, contacts: Arc<dyn ContactStore>, trace: TraceLog<E>) -> Self {
        Self {
            host,
            env,
            contacts,
            trace: Arc::new(trace),
            session: SharedSession::new(),
            config: EngineConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Abort the run when `token` is cancelled.
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that aborts the run when cancelled.
    ///
    /// Cancellation takes effect at the next wait: the timeline stops, the
    /// trace is closed and the consumer ends.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The shared session slot.
    pub const fn session(&self) -> &SharedSession<H::World> {
        &self.session
    }

    /// The trace log.
    pub fn trace(&self) -> &TraceLog<E> {
        &self.trace
    }

    /// The configuration in use.
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a scenario to the end of its window.
    ///
    /// The host's event stream is taken at the start, so a host can drive only
    /// one run.
    pub async fn run(&self, scenario: &Scenario) -> Result<RunReport, EngineError> {
        let events = self.host.event_stream().ok_or(EngineError::EventStreamUnavailable)?;

        tracing::info!(
            steps = scenario.steps().len(),
            duration_secs = scenario.duration().as_secs(),
            "scenario starting"
        );

        let consumer_shutdown = self.cancel.child_token();
        let consumer = EventConsumer::new(
            Arc::clone(&self.host),
            self.session.clone(),
            Arc::clone(&self.trace),
            self.config.expose_path.clone(),
            consumer_shutdown.clone(),
        );
        let consumer_task = tokio::spawn(consumer.run(events));

        let timeline = TimelineExecutor::new(
            Arc::clone(&self.host),
            self.env.clone(),
            Arc::clone(&self.contacts),
            self.session.clone(),
            Arc::clone(&self.trace),
            self.config.clone(),
            self.cancel.clone(),
        );
        let result = timeline.run(scenario).await;

        consumer_shutdown.cancel();
        let consumer = consumer_task.await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "event consumer task failed");
            ConsumerReport::default()
        });

        let timeline = result?;

        let dangling_world = self.session.current_session().await;
        if let Some(session) = dangling_world {
            tracing::warn!(%session, "world still held at end of run");
        }

        Ok(RunReport {
            timeline,
            consumer,
            trace_lines: self.trace.lines_written(),
            worlds_installed: self.session.installs(),
            dangling_world,
        })
    }
}
