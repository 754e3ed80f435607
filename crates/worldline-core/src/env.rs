//! Environment abstraction for deterministic scenario runs.
//!
//! The `Environment` trait decouples the engine from the system clock. This
//! enables:
//!
//! - Simulated runs: a paused tokio clock advances instantly, so a scenario
//!   window of several minutes completes in microseconds of real time and
//!   produces byte-identical traces.
//!
//! - Production runs: the system implementation reads the real wall clock and
//!   sleeps on the tokio timer without any change to engine logic.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Consistency: `wall_clock()` advances at the same rate as `now()` within
//!   one run
//! - Isolation: implementations must not share global state

use std::{
    future::Future,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tokio::time::Instant;

/// Abstract environment providing time and async sleeping.
///
/// Scenario schedules are written in wall-clock seconds, but every wait is
/// computed against the monotonic `now()` so that a wall-clock step (NTP
/// adjustment, suspended VM) cannot stretch or shrink a wait mid-run.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Returns the current monotonic time.
    ///
    /// # Invariants
    ///
    /// - Monotonicity: subsequent calls return times >= previous calls.
    fn now(&self) -> Instant;

    /// Returns the current wall-clock time.
    ///
    /// Used to anchor scenario schedules and to timestamp trace lines.
    fn wall_clock(&self) -> SystemTime;

    /// Sleeps for the specified duration.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Milliseconds since the Unix epoch, as written to the trace.
    ///
    /// Clocks set before the epoch report zero.
    fn unix_millis(&self) -> u64 {
        self.wall_clock()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
    }
}
