//! Runner error types.

use thiserror::Error;
use worldline_core::{ContactError, EngineError, ScenarioError, TraceError};

/// Errors that stop the runner before or during a scenario.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The host's own contact could not be published.
    #[error("cannot publish local contact: {0}")]
    Publish(#[source] ContactError),

    /// The scenario file is unreadable or malformed.
    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    /// The trace file could not be created.
    #[error(transparent)]
    Trace(#[from] TraceError),

    /// The window start is not a representable instant.
    #[error("time start {0} is out of range")]
    TimeStart(u64),

    /// The engine aborted the run.
    #[error("scenario aborted: {0}")]
    Engine(#[from] EngineError),
}

impl RunnerError {
    /// Returns true unless the engine reported a non-fatal failure.
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Engine(e) => e.is_fatal(),
            Self::Publish(_) | Self::Scenario(_) | Self::Trace(_) | Self::TimeStart(_) => true,
        }
    }
}
