//! Timeline executor.
//!
//! Walks the scenario's steps in list order, waits for each step's scheduled
//! instant and performs its action against the host. After the last step (or
//! the first step scheduled at or past the window end) it waits for the window
//! to elapse and closes the trace.
//!
//! ## Timing
//!
//! Step times are wall-clock instants. At the start of a run the executor
//! captures one `(monotonic, wall)` anchor pair and converts every scheduled
//! instant into a monotonic deadline relative to it. Every wait races the
//! engine's cancellation token.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use bytes::Bytes;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    contact::{ContactArtifact, ContactStore},
    engine::EngineConfig,
    env::Environment,
    error::EngineError,
    host::{Host, World},
    scenario::{Action, Scenario, Step},
    session::{SessionGuard, SharedSession},
    trace::{TraceCode, TraceLog},
};

/// Summary of one timeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimelineReport {
    /// Steps whose action was dispatched.
    pub executed: usize,
    /// Index of the first step scheduled at or past the window end, if any.
    pub stopped_at: Option<usize>,
    /// Join steps that exhausted every attempt.
    pub failed_joins: usize,
    /// Whether the run was cut short by cancellation.
    pub cancelled: bool,
    /// Whether flushing or shutting down the trace sink failed at the end.
    pub trace_close_failed: bool,
}

/// Longest single wait. Later instants are treated as never arriving.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Monotonic anchor for wall-clock schedules.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    mono: Instant,
    wall: SystemTime,
}

impl Anchor {
    fn capture(env: &impl Environment) -> Self {
        Self { mono: env.now(), wall: env.wall_clock() }
    }

    /// Monotonic deadline of a wall-clock instant. Past instants map to the
    /// anchor itself; distant ones are capped at [`FAR_FUTURE`].
    fn deadline(&self, target: SystemTime) -> Instant {
        target
            .duration_since(self.wall)
            .map_or(self.mono, |ahead| self.mono + ahead.min(FAR_FUTURE))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wait {
    Elapsed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinOutcome {
    Joined,
    Exhausted,
    Cancelled,
}

/// Executes scenario steps against a host.
pub struct TimelineExecutor<H: Host, E: Environment> {
    host: Arc<H>,
    env: E,
    contacts: Arc<dyn ContactStore>,
    session: SharedSession<H::World>,
    trace: Arc<TraceLog<E>>,
    config: EngineConfig,
    cancel: CancellationToken,
}

impl<H: Host, E: Environment> TimelineExecutor<H, E> {
    /// Create an executor sharing `session` and `trace` with the event consumer.
    pub fn new(
        host: Arc<H>,
        env: E,
        contacts: Arc<dyn ContactStore>,
        session: SharedSession<H::World>,
        trace: Arc<TraceLog<E>>,
        config: EngineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self { host, env, contacts, session, trace, config, cancel }
    }

    /// Run the scenario to the end of its window, then close the trace.
    ///
    /// A failure to close the trace is logged and does not discard the report.
    /// A fatal error closes the trace immediately and is returned without
    /// waiting for the window to elapse.
    pub async fn run(&self, scenario: &Scenario) -> Result<TimelineReport, EngineError> {
        let anchor = Anchor::capture(&self.env);

        let mut report = match self.run_steps(&anchor, scenario).await {
            Ok(report) => report,
            Err(e) => {
                if let Err(close) = self.trace.close().await {
                    tracing::warn!(error = %close, "failed to close trace after fatal error");
                }
                return Err(e);
            },
        };

        if !report.cancelled && self.wait_until(&anchor, scenario.time_end()).await == Wait::Cancelled
        {
            report.cancelled = true;
        }

        if let Err(e) = self.trace.close().await {
            tracing::warn!(error = %e, "failed to close trace");
            report.trace_close_failed = true;
        }
        tracing::info!(
            executed = report.executed,
            failed_joins = report.failed_joins,
            cancelled = report.cancelled,
            "timeline finished"
        );

        Ok(report)
    }

    async fn run_steps(
        &self,
        anchor: &Anchor,
        scenario: &Scenario,
    ) -> Result<TimelineReport, EngineError> {
        let mut report = TimelineReport::default();
        let time_end = scenario.time_end();

        for (index, step) in scenario.steps().iter().enumerate() {
            let target = match scenario.target_of(step) {
                Some(target) if target < time_end => target,
                _ => {
                    tracing::info!(step = index, offset = step.time_offset, "step past window end, stopping");
                    report.stopped_at = Some(index);
                    break;
                },
            };

            if self.wait_until(anchor, target).await == Wait::Cancelled {
                report.cancelled = true;
                break;
            }

            tracing::debug!(step = index, action = %step.action, peer = %step.target_id, "executing step");
            match self.execute(step).await? {
                Some(JoinOutcome::Exhausted) => report.failed_joins += 1,
                Some(JoinOutcome::Cancelled) => {
                    report.executed += 1;
                    report.cancelled = true;
                    break;
                },
                Some(JoinOutcome::Joined) | None => {},
            }
            report.executed += 1;
        }

        Ok(report)
    }

    async fn execute(&self, step: &Step) -> Result<Option<JoinOutcome>, EngineError> {
        let peer = step.target_id.as_str();

        match &step.action {
            Action::Add => {
                let root = self.contacts.read(peer, ContactArtifact::RootCertificate).await?;
                let handshake =
                    self.contacts.read(peer, ContactArtifact::HandshakeCertificate).await?;
                if let Err(e) = self.host.append_known_peer(root, handshake).await {
                    tracing::warn!(peer, error = %e, "host rejected known peer");
                }
            },
            Action::Dial => {
                let identity = self.contacts.read(peer, ContactArtifact::Identity).await?;
                if let Err(e) = self.host.dial(identity).await {
                    tracing::warn!(peer, error = %e, "dial failed");
                }
            },
            Action::Join => {
                let identity = self.contacts.read(peer, ContactArtifact::Identity).await?;
                {
                    let mut guard = self.session.lock().await;
                    self.release(&mut guard).await;
                }
                return self.join_with_retry(peer, identity).await.map(Some);
            },
            Action::Open => {
                let mut guard = self.session.lock().await;
                self.release(&mut guard).await;
                let world = self.host.open_world(&self.config.world_url).await;
                tracing::info!(session = %world.session_id(), "opened world");
                guard.install(world)?;
            },
            Action::Unknown(raw) => {
                tracing::debug!(action = raw.as_str(), "ignoring unknown step action");
            },
        }

        Ok(None)
    }

    /// Join a peer's world, holding the session lock only for each attempt.
    ///
    /// Retries do not look at the scenario window: a long retry sequence may
    /// run past its end.
    async fn join_with_retry(&self, peer: &str, identity: Bytes) -> Result<JoinOutcome, EngineError> {
        let attempts = self.config.join_attempts;

        for attempt in 1..=attempts {
            {
                let mut guard = self.session.lock().await;
                match self.host.join_world(identity.clone(), &self.config.join_path).await {
                    Ok(world) => {
                        tracing::info!(peer, attempt, session = %world.session_id(), "joined world");
                        guard.install(world)?;
                        return Ok(JoinOutcome::Joined);
                    },
                    Err(e) => tracing::debug!(peer, attempt, error = %e, "join attempt failed"),
                }
            }

            if attempt < attempts
                && self.pause(self.config.join_retry_interval).await == Wait::Cancelled
            {
                return Ok(JoinOutcome::Cancelled);
            }
        }

        tracing::error!(peer, attempts, "failed to join world, abandoning step");
        Ok(JoinOutcome::Exhausted)
    }

    /// Release the held world back to the host and trace its closure.
    async fn release(&self, guard: &mut SessionGuard<'_, H::World>) {
        if let Some(old) = guard.take() {
            self.host.close_world(&old).await;
            self.trace.record_lossy(TraceCode::WorldClose, old.session_id()).await;
        }
    }

    async fn wait_until(&self, anchor: &Anchor, target: SystemTime) -> Wait {
        let remaining = anchor.deadline(target).saturating_duration_since(self.env.now());
        self.pause(remaining).await
    }

    async fn pause(&self, duration: Duration) -> Wait {
        if self.cancel.is_cancelled() {
            return Wait::Cancelled;
        }
        if duration.is_zero() {
            return Wait::Elapsed;
        }
        tokio::select! {
            () = self.env.sleep(duration) => Wait::Elapsed,
            () = self.cancel.cancelled() => Wait::Cancelled,
        }
    }
}
