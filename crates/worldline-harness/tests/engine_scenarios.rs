//! End-to-end engine runs against the simulated host.
//!
//! Every test runs on tokio's paused clock, so a scenario window of a minute
//! completes instantly and timestamps in the trace are exact.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use tokio::time::Instant;
use worldline_core::{
    Action, ContactStore, Engine, EngineConfig, EngineError, Host, HostEvent, MemoryContactStore,
    Scenario, SessionId, Step, TraceCode, TraceLog, load_steps, parse_scenario_json,
};
use worldline_harness::{
    DEFAULT_EPOCH_SECS, HostCall, MemorySink, Reaction, SimEnv, SimHost, SimWorld,
};

const EPOCH_MS: u64 = DEFAULT_EPOCH_SECS * 1_000;

struct Fixture {
    env: SimEnv,
    sink: MemorySink,
    host: Arc<SimHost>,
    engine: Engine<SimHost, SimEnv>,
    start: Instant,
}

impl Fixture {
    async fn new(host: SimHost) -> Self {
        Self::with_peers(host, &["p1", "p2"]).await
    }

    async fn with_peers(host: SimHost, peers: &[&str]) -> Self {
        Self::with_sink(host, peers, MemorySink::new()).await
    }

    async fn with_sink(host: SimHost, peers: &[&str], sink: MemorySink) -> Self {
        let env = SimEnv::new();
        let host = Arc::new(host);

        let contacts = MemoryContactStore::new();
        for peer in peers {
            let card = SimHost::loopback(*peer).local_contact();
            contacts.publish(peer, &card).await.unwrap();
        }

        let engine = Engine::new(
            Arc::clone(&host),
            env,
            Arc::new(contacts),
            TraceLog::new(env, sink.clone()),
        );

        Self { env, sink, host, engine, start: Instant::now() }
    }

    fn with_config(mut self, config: EngineConfig) -> Self {
        self.engine = self.engine.with_config(config);
        self
    }

    fn scenario(&self, steps: Vec<Step>, duration_secs: u64) -> Scenario {
        Scenario::new(steps, self.env.epoch(), Duration::from_secs(duration_secs))
    }

    /// Offset of every recorded call matching `filter` from the fixture start.
    fn call_offsets(&self, filter: impl Fn(&HostCall) -> bool) -> Vec<Duration> {
        self.host
            .timed_calls()
            .into_iter()
            .filter(|timed| filter(&timed.call))
            .map(|timed| timed.at.duration_since(self.start))
            .collect()
    }

    fn codes(&self) -> Vec<TraceCode> {
        self.sink.lines().into_iter().map(|line| line.code).collect()
    }
}

fn step(offset: i64, action: &str, peer: &str) -> Step {
    Step::new(offset, Action::parse(action), peer)
}

fn opened_sessions(host: &SimHost) -> Vec<SessionId> {
    host.calls()
        .into_iter()
        .filter_map(|call| match call {
            HostCall::OpenWorld { session, .. } => Some(session),
            _ => None,
        })
        .collect()
}

fn joined_sessions(host: &SimHost) -> Vec<SessionId> {
    host.calls()
        .into_iter()
        .filter_map(|call| match call {
            HostCall::JoinWorld { joined, .. } => joined,
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn join_round_trip_writes_enter_then_session_join() {
    let host = SimHost::builder().on_join([Reaction::EnterWorld, Reaction::RequestSession]).build();
    let fx = Fixture::new(host).await;
    let scenario = fx.scenario(vec![step(0, "add", "p1"), step(1, "join", "p1")], 5);

    let report = fx.engine.run(&scenario).await.unwrap();

    let lines = fx.sink.lines();
    assert_eq!(fx.codes(), vec![TraceCode::WorldEnter, TraceCode::SessionJoin]);

    let joined = joined_sessions(&fx.host);
    assert_eq!(joined.len(), 1);
    assert_eq!(lines[0].subject, joined[0].to_string());
    for line in &lines {
        assert_eq!(line.timestamp_ms, EPOCH_MS + 1_000);
    }

    let p1 = SimHost::loopback("p1").local_contact();
    assert!(fx.host.calls().contains(&HostCall::AppendKnownPeer {
        root_certificate: p1.root_certificate,
        handshake_certificate: p1.handshake_certificate,
    }));
    assert!(fx.host.calls().contains(&HostCall::ExposeWorld {
        session: joined[0],
        path: "/".to_string(),
    }));

    assert!(fx.sink.is_shut_down());
    assert_eq!(fx.env.elapsed(), Duration::from_secs(5));
    assert_eq!(report.timeline.executed, 2);
    assert_eq!(report.consumer.handled, 3);
    assert_eq!(report.trace_lines, 2);
    assert_eq!(report.worlds_installed, 1);
    assert_eq!(report.dangling_world, Some(joined[0]));
}

#[tokio::test(start_paused = true)]
async fn host_leaving_world_is_traced_and_clears_session() {
    let host = SimHost::builder().on_open([Reaction::LeaveWorld]).build();
    let fx = Fixture::new(host).await;
    let scenario = fx.scenario(vec![step(0, "open", "")], 2);

    let report = fx.engine.run(&scenario).await.unwrap();

    let opened = opened_sessions(&fx.host);
    let lines = fx.sink.lines();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].code, TraceCode::WorldClose);
    assert_eq!(lines[0].subject, opened[0].to_string());
    assert_eq!(report.dangling_world, None);
    assert_eq!(fx.host.live_worlds(), 0);
    assert!(!fx.host.calls().iter().any(|call| matches!(call, HostCall::CloseWorld { .. })));
}

#[tokio::test(start_paused = true)]
async fn malformed_descriptors_are_skipped() {
    let document = r#"[
        { "time": 0, "do": "open" },
        { "do": "open" },
        { "time": "soon", "do": "open" },
        { "time": 1, "do": "dial", "id": "p1" }
    ]"#;
    let loaded = load_steps(&parse_scenario_json(document).unwrap());
    assert_eq!(loaded.steps.len(), 2);
    assert_eq!(loaded.skipped.iter().map(|s| s.index).collect::<Vec<_>>(), vec![1, 2]);

    let fx = Fixture::new(SimHost::default()).await;
    let report = fx.engine.run(&fx.scenario(loaded.steps, 3)).await.unwrap();

    assert_eq!(report.timeline.executed, 2);
    assert_eq!(opened_sessions(&fx.host).len(), 1);
    assert_eq!(fx.call_offsets(|call| matches!(call, HostCall::Dial { .. })), vec![
        Duration::from_secs(1)
    ]);
}

#[tokio::test(start_paused = true)]
async fn exhausted_join_makes_every_attempt_then_continues() {
    let host = SimHost::builder().fail_all_joins().build();
    let fx = Fixture::new(host).await;
    let scenario = fx.scenario(vec![step(0, "join", "p1")], 5);

    let report = fx.engine.run(&scenario).await.unwrap();

    let attempts = fx.call_offsets(|call| matches!(call, HostCall::JoinWorld { .. }));
    assert_eq!(attempts.len(), 100);
    assert_eq!(attempts[0], Duration::ZERO);
    assert_eq!(attempts[99], Duration::from_millis(9_900));
    for pair in attempts.windows(2) {
        assert_eq!(pair[1] - pair[0], Duration::from_millis(100));
    }

    assert_eq!(report.timeline.failed_joins, 1);
    assert_eq!(report.timeline.executed, 1);
    assert_eq!(report.dangling_world, None);
    assert!(fx.sink.lines().is_empty());
    assert!(fx.sink.is_shut_down());
    // Retries are not bounded by the window.
    assert_eq!(fx.env.elapsed(), Duration::from_millis(9_900));
}

#[tokio::test(start_paused = true)]
async fn join_succeeds_after_transient_failures() {
    let host = SimHost::builder().join_failures(3).on_join([Reaction::EnterWorld]).build();
    let fx = Fixture::new(host).await;
    let scenario = fx.scenario(vec![step(1, "join", "p2")], 5);

    let report = fx.engine.run(&scenario).await.unwrap();

    let attempts = fx.call_offsets(|call| matches!(call, HostCall::JoinWorld { .. }));
    assert_eq!(attempts, vec![
        Duration::from_millis(1_000),
        Duration::from_millis(1_100),
        Duration::from_millis(1_200),
        Duration::from_millis(1_300),
    ]);

    let lines = fx.sink.lines();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].code, TraceCode::WorldEnter);
    assert_eq!(lines[0].timestamp_ms, EPOCH_MS + 1_300);
    assert_eq!(report.timeline.failed_joins, 0);
}

#[tokio::test(start_paused = true)]
async fn custom_join_policy_is_honored() {
    let host = SimHost::builder().fail_all_joins().build();
    let fx = Fixture::new(host).await.with_config(EngineConfig {
        join_attempts: 3,
        join_retry_interval: Duration::from_millis(250),
        join_path: "/lobby".to_string(),
        ..EngineConfig::default()
    });
    let scenario = fx.scenario(vec![step(0, "join", "p1")], 2);

    let report = fx.engine.run(&scenario).await.unwrap();

    let attempts = fx.call_offsets(|call| {
        matches!(call, HostCall::JoinWorld { path, .. } if path == "/lobby")
    });
    assert_eq!(attempts, vec![
        Duration::ZERO,
        Duration::from_millis(250),
        Duration::from_millis(500)
    ]);
    assert_eq!(report.timeline.failed_joins, 1);
}

#[tokio::test(start_paused = true)]
async fn opening_again_closes_previous_world_first() {
    let host = SimHost::builder().on_open([Reaction::EnterWorld]).build();
    let fx = Fixture::new(host).await;
    let scenario = fx.scenario(vec![step(0, "open", ""), step(1, "open", "")], 3);

    let report = fx.engine.run(&scenario).await.unwrap();

    let opened = opened_sessions(&fx.host);
    assert_eq!(opened.len(), 2);

    let lines: Vec<_> =
        fx.sink.lines().into_iter().map(|line| (line.timestamp_ms, line.code, line.subject)).collect();
    assert_eq!(lines, vec![
        (EPOCH_MS, TraceCode::WorldEnter, opened[0].to_string()),
        (EPOCH_MS + 1_000, TraceCode::WorldClose, opened[0].to_string()),
        (EPOCH_MS + 1_000, TraceCode::WorldEnter, opened[1].to_string()),
    ]);
    assert!(fx.host.calls().contains(&HostCall::CloseWorld { session: opened[0] }));
    assert_eq!(fx.host.max_live_worlds(), 1);
    assert_eq!(report.dangling_world, Some(opened[1]));
}

#[tokio::test(start_paused = true)]
async fn joining_closes_hosted_world_first() {
    let host = SimHost::builder()
        .on_open([Reaction::EnterWorld])
        .on_join([Reaction::EnterWorld])
        .build();
    let fx = Fixture::new(host).await;
    let scenario = fx.scenario(vec![step(0, "open", ""), step(2, "join", "p1")], 4);

    fx.engine.run(&scenario).await.unwrap();

    let opened = opened_sessions(&fx.host);
    let joined = joined_sessions(&fx.host);
    let lines: Vec<_> = fx.sink.lines().into_iter().map(|line| (line.code, line.subject)).collect();
    assert_eq!(lines, vec![
        (TraceCode::WorldEnter, opened[0].to_string()),
        (TraceCode::WorldClose, opened[0].to_string()),
        (TraceCode::WorldEnter, joined[0].to_string()),
    ]);
    assert_eq!(fx.host.max_live_worlds(), 1);
}

#[tokio::test(start_paused = true)]
async fn steps_past_window_end_stop_the_timeline() {
    let fx = Fixture::new(SimHost::default()).await;
    let scenario = fx.scenario(
        vec![step(0, "open", ""), step(5, "dial", "p1"), step(1, "dial", "p1")],
        5,
    );

    let report = fx.engine.run(&scenario).await.unwrap();

    assert_eq!(report.timeline.stopped_at, Some(1));
    assert_eq!(report.timeline.executed, 1);
    assert!(fx.call_offsets(|call| matches!(call, HostCall::Dial { .. })).is_empty());
    assert_eq!(fx.env.elapsed(), Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn late_offsets_run_immediately_in_list_order() {
    let fx = Fixture::new(SimHost::default()).await;
    let scenario = fx.scenario(vec![step(3, "add", "p1"), step(1, "dial", "p1")], 6);

    fx.engine.run(&scenario).await.unwrap();

    let calls = fx.host.timed_calls();
    assert!(matches!(calls[0].call, HostCall::AppendKnownPeer { .. }));
    assert!(matches!(calls[1].call, HostCall::Dial { .. }));
    assert_eq!(calls[0].at.duration_since(fx.start), Duration::from_secs(3));
    assert_eq!(calls[1].at.duration_since(fx.start), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn unknown_actions_are_no_ops() {
    let fx = Fixture::new(SimHost::default()).await;
    let scenario = fx.scenario(vec![step(0, "teleport", "p1"), step(1, "", "")], 2);

    let report = fx.engine.run(&scenario).await.unwrap();

    assert_eq!(report.timeline.executed, 2);
    assert!(fx.host.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn missing_contact_aborts_run_and_closes_trace() {
    let fx = Fixture::with_peers(SimHost::default(), &["p1"]).await;
    let scenario = fx.scenario(vec![step(0, "dial", "p1"), step(2, "join", "p3")], 30);

    let err = fx.engine.run(&scenario).await.unwrap_err();

    assert!(matches!(&err, EngineError::Contact(e) if e.peer() == "p3"));
    assert!(err.is_fatal());
    assert!(fx.sink.is_shut_down());
    assert_eq!(fx.env.elapsed(), Duration::from_secs(2));
    assert_eq!(fx.host.join_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn events_for_other_worlds_are_ignored() {
    let fx = Fixture::new(SimHost::default()).await;
    let scenario = fx.scenario(vec![step(0, "open", "")], 3);

    let injector = {
        let host = Arc::clone(&fx.host);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let held = opened_sessions(&host)[0];
            let foreign = SimWorld::detached(SessionId::from_u128(0xF0));

            host.emit(HostEvent::WorldEnter { world: foreign.clone() });
            host.emit(HostEvent::SessionReady {
                world: foreign,
                peer_id: Bytes::from_static(b"peer-9"),
                session_id: SessionId::from_u128(9),
            });
            host.emit(HostEvent::SessionClose {
                world: SimWorld::detached(held),
                peer_id: Bytes::from_static(b"peer-7"),
                session_id: SessionId::from_u128(7),
            });
        })
    };

    let report = fx.engine.run(&scenario).await.unwrap();
    injector.await.unwrap();

    let lines = fx.sink.lines();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].code, TraceCode::SessionLeave);
    assert_eq!(lines[0].subject, SessionId::from_u128(7).to_string());
    assert_eq!(lines[0].timestamp_ms, EPOCH_MS + 1_000);
    assert_eq!(report.consumer.handled, 1);
    assert_eq!(report.consumer.ignored, 2);
}

#[tokio::test(start_paused = true)]
async fn object_events_for_held_world_are_ignored() {
    let host = SimHost::builder().on_open([Reaction::AppendObject, Reaction::DeleteObject]).build();
    let fx = Fixture::new(host).await;
    let scenario = fx.scenario(vec![step(0, "open", "")], 2);

    let report = fx.engine.run(&scenario).await.unwrap();

    let opened = opened_sessions(&fx.host);
    assert!(fx.sink.lines().is_empty());
    assert_eq!(report.consumer.ignored, 2);
    assert_eq!(report.consumer.handled, 0);
    assert_eq!(report.dangling_world, Some(opened[0]));
    assert_eq!(fx.host.live_worlds(), 1);
}

#[tokio::test(start_paused = true)]
async fn peer_events_are_not_traced() {
    let fx = Fixture::new(SimHost::default()).await;
    let scenario = fx.scenario(vec![step(0, "dial", "p2")], 1);

    let report = fx.engine.run(&scenario).await.unwrap();

    let identity = SimHost::loopback("p2").local_contact().identity;
    assert_eq!(fx.host.calls(), vec![HostCall::Dial { identity }]);
    assert!(fx.sink.lines().is_empty());
    assert_eq!(report.consumer.ignored, 1);
    assert_eq!(report.consumer.handled, 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_run_early() {
    let host = SimHost::builder().on_open([Reaction::EnterWorld]).build();
    let fx = Fixture::new(host).await;
    let scenario = fx.scenario(vec![step(0, "open", ""), step(10, "open", "")], 60);

    let cancel = fx.engine.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        cancel.cancel();
    });

    let report = fx.engine.run(&scenario).await.unwrap();

    assert!(report.timeline.cancelled);
    assert_eq!(report.timeline.executed, 1);
    assert_eq!(fx.env.elapsed(), Duration::from_secs(3));
    assert_eq!(fx.codes(), vec![TraceCode::WorldEnter]);
    assert!(fx.sink.is_shut_down());
}

#[tokio::test(start_paused = true)]
async fn failing_trace_sink_does_not_interrupt_the_run() {
    let host = SimHost::builder().on_open([Reaction::EnterWorld]).build();
    let fx = Fixture::with_sink(host, &["p1"], MemorySink::failing()).await;
    let scenario = fx.scenario(vec![step(0, "open", ""), step(1, "dial", "p1")], 3);

    let report = fx.engine.run(&scenario).await.unwrap();

    let identity = SimHost::loopback("p1").local_contact().identity;
    assert!(fx.host.calls().contains(&HostCall::Dial { identity }));
    assert_eq!(report.timeline.executed, 2);
    assert!(report.timeline.trace_close_failed);
    assert_eq!(report.trace_lines, 0);
    assert!(fx.engine.trace().is_closed().await);
    assert_eq!(fx.env.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn oversized_window_still_runs_its_steps() {
    let host = SimHost::builder().on_open([Reaction::EnterWorld]).build();
    let fx = Fixture::new(host).await;
    let scenario = fx.scenario(vec![step(0, "open", "")], u64::MAX);

    let cancel = fx.engine.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        cancel.cancel();
    });

    let report = fx.engine.run(&scenario).await.unwrap();

    assert_eq!(report.timeline.executed, 1);
    assert_eq!(report.timeline.stopped_at, None);
    assert!(report.timeline.cancelled);
    assert_eq!(opened_sessions(&fx.host).len(), 1);
    assert_eq!(fx.codes(), vec![TraceCode::WorldEnter]);
    assert_eq!(fx.env.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_join_retries() {
    let host = SimHost::builder().fail_all_joins().build();
    let fx = Fixture::new(host).await;
    let scenario = fx.scenario(vec![step(0, "join", "p1"), step(20, "open", "")], 60);

    let cancel = fx.engine.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(450)).await;
        cancel.cancel();
    });

    let report = fx.engine.run(&scenario).await.unwrap();

    assert!(report.timeline.cancelled);
    assert_eq!(fx.host.join_attempts(), 5);
    assert!(opened_sessions(&fx.host).is_empty());
    assert_eq!(fx.env.elapsed(), Duration::from_millis(450));
}

#[tokio::test(start_paused = true)]
async fn closed_event_stream_ends_consumer() {
    let host = SimHost::builder().on_open([Reaction::EnterWorld]).build();
    host.shutdown();
    let fx = Fixture::new(host).await;
    let scenario = fx.scenario(vec![step(0, "open", "")], 2);

    let report = fx.engine.run(&scenario).await.unwrap();

    assert!(report.consumer.stream_closed);
    assert!(fx.sink.lines().is_empty());
    assert_eq!(opened_sessions(&fx.host).len(), 1);
    assert_eq!(fx.env.elapsed(), Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn second_run_on_same_host_is_rejected() {
    let fx = Fixture::new(SimHost::default()).await;
    let _stream = fx.host.event_stream().unwrap();

    let err = fx.engine.run(&fx.scenario(vec![step(0, "open", "")], 1)).await.unwrap_err();

    assert!(matches!(err, EngineError::EventStreamUnavailable));
    assert!(fx.host.calls().is_empty());
}
