//! Simulated environment on tokio's clock.
//!
//! Under a paused runtime (`#[tokio::test(start_paused = true)]` or a runtime
//! built with `start_paused(true)`) tokio's clock only moves when every task
//! is idle, and then jumps straight to the next timer. `SimEnv` derives its
//! wall clock from that same clock, so scheduled waits finish instantly in
//! real time and trace timestamps are reproducible.

use std::{
    future::Future,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tokio::time::Instant;
use worldline_core::Environment;

/// Default simulated wall-clock origin, in seconds since the Unix epoch.
pub const DEFAULT_EPOCH_SECS: u64 = 1_700_000_000;

/// Simulated environment.
///
/// Wall clock = `epoch` + time elapsed on the tokio clock since creation.
#[derive(Debug, Clone, Copy)]
pub struct SimEnv {
    origin: Instant,
    epoch: SystemTime,
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEnv {
    /// Create an environment whose wall clock starts at [`DEFAULT_EPOCH_SECS`].
    pub fn new() -> Self {
        Self::starting_at(UNIX_EPOCH + Duration::from_secs(DEFAULT_EPOCH_SECS))
    }

    /// Create an environment whose wall clock reads `epoch` right now.
    pub fn starting_at(epoch: SystemTime) -> Self {
        Self { origin: Instant::now(), epoch }
    }

    /// Wall-clock origin.
    pub const fn epoch(&self) -> SystemTime {
        self.epoch
    }

    /// Time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        Instant::now().saturating_duration_since(self.origin)
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_clock(&self) -> SystemTime {
        self.epoch + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}
