//! Worldline scenario engine.
//!
//! Drives one peer-to-peer protocol host through a timed scenario: registering
//! peers, dialing, joining or hosting a shared world, while reacting to the
//! host's asynchronous events and writing an ordered trace of what happened.
//!
//! ## Architecture
//!
//! ```text
//! worldline-core
//!   ├─ Environment        (monotonic + wall clock, sleeping)
//!   ├─ Host / World       (facade over the protocol host)
//!   ├─ ContactStore       (per-peer certificates and identity hashes)
//!   ├─ ScenarioLoader     (raw descriptors -> ordered steps)
//!   ├─ TraceLog           (line-atomic trace sink)
//!   ├─ SharedSession      (lock-guarded current world)
//!   ├─ TimelineExecutor   (timed step execution)
//!   ├─ EventConsumer      (host event reactions)
//!   └─ Engine             (runs both loops for one scenario)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod consumer;
pub mod contact;
pub mod engine;
pub mod env;
pub mod error;
pub mod host;
pub mod scenario;
pub mod session;
pub mod timeline;
pub mod trace;

pub use consumer::{ConsumerReport, EventConsumer};
pub use contact::{ContactArtifact, ContactError, ContactStore, DirContactStore, MemoryContactStore};
pub use engine::{
    DEFAULT_JOIN_ATTEMPTS, DEFAULT_JOIN_RETRY_INTERVAL, DEFAULT_WORLD_PATH, DEFAULT_WORLD_URL,
    Engine, EngineConfig, RunReport,
};
pub use env::Environment;
pub use error::EngineError;
pub use host::{ContactCard, EventStream, Host, HostError, HostEvent, SessionId, World};
pub use scenario::{
    Action, LoadedSteps, RawStep, Scenario, ScenarioError, SkipReason, SkippedStep, Step,
    load_steps, parse_scenario_json, read_scenario_file,
};
pub use session::{SessionError, SessionGuard, SharedSession};
pub use timeline::{TimelineExecutor, TimelineReport};
pub use trace::{TraceCode, TraceError, TraceLine, TraceLog, TraceSink};
