//! Fuzz target for the scenario loader
//!
//! # Strategy
//!
//! - Raw documents: arbitrary bytes fed to the JSON parser
//! - Descriptors: arbitrary key/value maps, with the well-known keys
//!   over-represented so both valid and malformed steps are common
//! - Windows: arbitrary start instants and durations, including ones near the
//!   limits of `SystemTime`
//!
//! # Invariants
//!
//! - NEVER panic on any input
//! - Every descriptor is either loaded or skipped, never both
//! - Loaded steps keep input order
//! - A loaded step's offset is exactly its `time` value
//! - `time_end` is never before `time_start`

#![no_main]

use std::{
    collections::BTreeMap,
    time::{Duration, UNIX_EPOCH},
};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use worldline_core::{load_steps, parse_scenario_json, RawStep, Scenario};

#[derive(Debug, Arbitrary)]
enum Key {
    Time,
    Do,
    Id,
    Other(String),
}

#[derive(Debug, Arbitrary)]
struct Descriptor {
    fields: Vec<(Key, String)>,
}

#[derive(Debug, Arbitrary)]
enum Input {
    Document(Vec<u8>),
    Descriptors { descriptors: Vec<Descriptor>, start_secs: u64, duration_secs: u64 },
}

impl Descriptor {
    fn into_raw(self) -> RawStep {
        let mut raw = BTreeMap::new();
        for (key, value) in self.fields {
            let key = match key {
                Key::Time => "time".to_string(),
                Key::Do => "do".to_string(),
                Key::Id => "id".to_string(),
                Key::Other(other) => other,
            };
            raw.insert(key, value);
        }
        raw
    }
}

fn check_loaded(raw: &[RawStep], start_secs: u64, duration_secs: u64) {
    let loaded = load_steps(raw);
    assert_eq!(loaded.steps.len() + loaded.skipped.len(), raw.len());

    let mut steps = loaded.steps.iter();
    let mut skipped = loaded.skipped.iter().peekable();
    for (index, descriptor) in raw.iter().enumerate() {
        if skipped.peek().is_some_and(|skip| skip.index == index) {
            skipped.next();
            continue;
        }
        let step = steps.next().expect("loaded step for every kept descriptor");
        let time = descriptor.get("time").expect("kept descriptor has a time");
        assert_eq!(time.parse::<i64>().ok(), Some(step.time_offset));
    }
    assert!(steps.next().is_none());
    assert!(skipped.next().is_none());

    let Some(start) = UNIX_EPOCH.checked_add(Duration::from_secs(start_secs)) else {
        return;
    };
    let scenario = Scenario::new(loaded.steps, start, Duration::from_secs(duration_secs));
    assert!(scenario.time_end() >= scenario.time_start());
    for step in scenario.steps() {
        let _ = scenario.target_of(step);
    }
}

fuzz_target!(|input: Input| {
    match input {
        Input::Document(bytes) => {
            let Ok(document) = std::str::from_utf8(&bytes) else {
                return;
            };
            if let Ok(raw) = parse_scenario_json(document) {
                check_loaded(&raw, 0, 60);
            }
        },
        Input::Descriptors { descriptors, start_secs, duration_secs } => {
            let raw: Vec<RawStep> = descriptors.into_iter().map(Descriptor::into_raw).collect();
            check_loaded(&raw, start_secs, duration_secs);
        },
    }
});
