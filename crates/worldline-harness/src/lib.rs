//! Deterministic simulation harness for worldline scenarios.
//!
//! Provides a simulated [`Environment`](worldline_core::Environment) running on
//! tokio's paused clock, a scriptable in-process [`Host`](worldline_core::Host)
//! and an in-memory trace sink, so full engine runs complete instantly and
//! reproducibly.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::{sync::Arc, time::Duration};
//!
//! use worldline_core::{Action, Engine, MemoryContactStore, Scenario, Step, TraceLog};
//! use worldline_harness::{MemorySink, SimEnv, SimHost};
//!
//! #[tokio::test(start_paused = true)]
//! async fn open_world() {
//!     let env = SimEnv::new();
//!     let sink = MemorySink::new();
//!     let engine = Engine::new(
//!         Arc::new(SimHost::loopback("a")),
//!         env,
//!         Arc::new(MemoryContactStore::new()),
//!         TraceLog::new(env, sink.clone()),
//!     );
//!
//!     let steps = vec![Step::new(0, Action::Open, "")];
//!     let scenario = Scenario::new(steps, env.epoch(), Duration::from_secs(5));
//!     engine.run(&scenario).await.unwrap();
//!
//!     assert_eq!(sink.lines().len(), 2); // E, then J from the loopback peer
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod memory_sink;
pub mod sim_env;
pub mod sim_host;

pub use memory_sink::MemorySink;
pub use sim_env::{DEFAULT_EPOCH_SECS, SimEnv};
pub use sim_host::{
    HostCall, Reaction, SimHost, SimHostBuilder, SimHostConfig, SimWorld, TimedCall, WorldOrigin,
};
