//! Scenario model and loader.
//!
//! A scenario is an ordered list of timed steps executed inside a fixed
//! wall-clock window. Steps are produced from raw descriptors, string-keyed
//! mappings with the keys `time`, `do` and `id`:
//!
//! ```json
//! [
//!   { "time": "0", "do": "add",  "id": "p1" },
//!   { "time": "1", "do": "join", "id": "p1" }
//! ]
//! ```
//!
//! Loading is lenient. A descriptor without a usable `time` is skipped with a
//! warning; everything else is accepted and left for execution to interpret.

use std::{
    collections::BTreeMap,
    fmt,
    time::{Duration, SystemTime},
};

use serde::Deserialize;

/// Key holding the step offset in seconds.
pub const TIME_KEY: &str = "time";

/// Key holding the step action.
pub const ACTION_KEY: &str = "do";

/// Key holding the target peer id.
pub const ID_KEY: &str = "id";

/// A raw step descriptor.
pub type RawStep = BTreeMap<String, String>;

/// Action performed by a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Register a peer as known.
    Add,
    /// Dial a peer.
    Dial,
    /// Join the world a peer exposes.
    Join,
    /// Open and host a new world.
    Open,
    /// Unrecognized action, executed as a no-op.
    Unknown(String),
}

impl Action {
    /// Parse the value of the `do` key.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "add" => Self::Add,
            "dial" => Self::Dial,
            "join" => Self::Join,
            "open" => Self::Open,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => f.write_str("add"),
            Self::Dial => f.write_str("dial"),
            Self::Join => f.write_str("join"),
            Self::Open => f.write_str("open"),
            Self::Unknown(raw) => write!(f, "unknown({raw:?})"),
        }
    }
}

/// One timed step of a scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Offset from the scenario start, in seconds. May be negative.
    pub time_offset: i64,
    /// Action to perform.
    pub action: Action,
    /// Target peer id; empty when the descriptor had none.
    pub target_id: String,
}

impl Step {
    /// Build a step.
    pub fn new(time_offset: i64, action: Action, target_id: impl Into<String>) -> Self {
        Self { time_offset, action, target_id: target_id.into() }
    }
}

/// Why a descriptor was dropped by the loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The descriptor has no `time` key.
    MissingTime,
    /// The `time` value is not an integer.
    InvalidTime(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingTime => f.write_str("missing 'time' field"),
            Self::InvalidTime(raw) => write!(f, "invalid timestamp {raw:?}"),
        }
    }
}

/// A descriptor dropped by the loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedStep {
    /// Position of the descriptor in the input.
    pub index: usize,
    /// Why it was dropped.
    pub reason: SkipReason,
}

/// Result of loading descriptors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadedSteps {
    /// Steps in input order.
    pub steps: Vec<Step>,
    /// Descriptors that were dropped.
    pub skipped: Vec<SkippedStep>,
}

/// Convert raw descriptors into steps, preserving order.
pub fn load_steps(raw: &[RawStep]) -> LoadedSteps {
    let mut loaded = LoadedSteps::default();

    for (index, descriptor) in raw.iter().enumerate() {
        match parse_step(descriptor) {
            Ok(step) => loaded.steps.push(step),
            Err(reason) => {
                tracing::warn!(step = index, %reason, "skipping scenario step");
                loaded.skipped.push(SkippedStep { index, reason });
            },
        }
    }

    loaded
}

fn parse_step(descriptor: &RawStep) -> Result<Step, SkipReason> {
    let raw_time = descriptor.get(TIME_KEY).ok_or(SkipReason::MissingTime)?;
    let time_offset =
        raw_time.parse::<i64>().map_err(|_| SkipReason::InvalidTime(raw_time.clone()))?;

    let action = Action::parse(descriptor.get(ACTION_KEY).map_or("", String::as_str));
    let target_id = descriptor.get(ID_KEY).cloned().unwrap_or_default();

    Ok(Step { time_offset, action, target_id })
}

/// Errors from reading a scenario document.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    /// The scenario file could not be read.
    #[error("cannot read scenario {path}: {source}")]
    Io {
        /// Path of the file.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The document is not a JSON array of flat objects.
    #[error("malformed scenario JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Scalar JSON value accepted as a descriptor field.
#[derive(Deserialize)]
#[serde(untagged)]
enum FieldValue {
    Text(String),
    Number(serde_json::Number),
    Flag(bool),
    Null,
}

impl From<FieldValue> for String {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Text(text) => text,
            FieldValue::Number(number) => number.to_string(),
            FieldValue::Flag(flag) => flag.to_string(),
            FieldValue::Null => Self::new(),
        }
    }
}

/// Parse a JSON scenario document into raw descriptors.
///
/// Field values may be strings, numbers, booleans or null; numbers and
/// booleans are stringified so `"time": 3` and `"time": "3"` load identically,
/// and null loads as an empty string.
pub fn parse_scenario_json(document: &str) -> Result<Vec<RawStep>, ScenarioError> {
    let entries: Vec<BTreeMap<String, FieldValue>> = serde_json::from_str(document)?;
    Ok(entries
        .into_iter()
        .map(|entry| entry.into_iter().map(|(key, value)| (key, value.into())).collect())
        .collect())
}

/// Read and parse a JSON scenario file.
pub async fn read_scenario_file(
    path: impl AsRef<std::path::Path>,
) -> Result<Vec<RawStep>, ScenarioError> {
    let path = path.as_ref();
    let document = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ScenarioError::Io { path: path.display().to_string(), source })?;
    parse_scenario_json(&document)
}

/// A scenario: ordered steps inside a wall-clock window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    steps: Vec<Step>,
    time_start: SystemTime,
    duration: Duration,
}

impl Scenario {
    /// Create a scenario starting at `time_start` and lasting `duration`.
    pub const fn new(steps: Vec<Step>, time_start: SystemTime, duration: Duration) -> Self {
        Self { steps, time_start, duration }
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Start of the window.
    pub const fn time_start(&self) -> SystemTime {
        self.time_start
    }

    /// Length of the window.
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    /// End of the window.
    ///
    /// A window reaching past the last representable instant ends at the
    /// latest instant that can be represented, give or take its halving step.
    pub fn time_end(&self) -> SystemTime {
        let mut span = self.duration;
        loop {
            if let Some(end) = self.time_start.checked_add(span) {
                return end;
            }
            span /= 2;
        }
    }

    /// Scheduled wall-clock instant of a step, `None` if unrepresentable.
    pub fn target_of(&self, step: &Step) -> Option<SystemTime> {
        let magnitude = Duration::from_secs(step.time_offset.unsigned_abs());
        if step.time_offset >= 0 {
            self.time_start.checked_add(magnitude)
        } else {
            self.time_start.checked_sub(magnitude)
        }
    }
}
