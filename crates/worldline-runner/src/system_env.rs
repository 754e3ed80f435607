//! Production environment backed by the system clocks.

use std::time::{Duration, SystemTime};

use tokio::time::Instant;
use worldline_core::Environment;

/// Environment using the tokio clock for waits and the system wall clock for
/// schedules and trace timestamps.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_clock(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use super::*;

    #[tokio::test]
    async fn system_env_sleep_works() {
        let env = SystemEnv::new();

        let start = env.now();
        env.sleep(Duration::from_millis(20)).await;

        assert!(env.now() - start >= Duration::from_millis(20), "sleep should wait");
    }

    #[test]
    fn unix_millis_tracks_system_clock() {
        let env = SystemEnv::new();

        let before = u64::try_from(SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis())
            .unwrap();
        let stamped = env.unix_millis();

        assert!(stamped >= before);
        assert!(stamped - before < 5_000);
    }
}
