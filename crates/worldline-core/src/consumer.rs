//! Host event consumer.
//!
//! Drains the host's event stream and reacts to notifications about the world
//! the scenario currently holds. Each event is handled under the session lock;
//! events about any other world are ignored.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    env::Environment,
    host::{EventStream, Host, HostEvent, World},
    session::SharedSession,
    trace::{TraceCode, TraceLog},
};

/// Summary of one consumer run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    /// Events that matched the held world and were acted upon.
    pub handled: u64,
    /// Events that were ignored.
    pub ignored: u64,
    /// Whether the loop ended because the host closed its stream.
    pub stream_closed: bool,
}

/// Reacts to host events concerning the held world.
pub struct EventConsumer<H: Host, E: Environment> {
    host: Arc<H>,
    session: SharedSession<H::World>,
    trace: Arc<TraceLog<E>>,
    expose_path: String,
    shutdown: CancellationToken,
}

impl<H: Host, E: Environment> EventConsumer<H, E> {
    /// Create a consumer sharing `session` and `trace` with the timeline.
    pub fn new(
        host: Arc<H>,
        session: SharedSession<H::World>,
        trace: Arc<TraceLog<E>>,
        expose_path: impl Into<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self { host, session, trace, expose_path: expose_path.into(), shutdown }
    }

    /// Consume events until the stream ends or `shutdown` fires.
    pub async fn run(self, mut events: EventStream<H::World>) -> ConsumerReport {
        let mut report = ConsumerReport::default();

        loop {
            let event = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                event = events.recv() => event,
            };

            let Some(event) = event else {
                report.stream_closed = true;
                break;
            };

            if self.handle(event).await {
                report.handled += 1;
            } else {
                report.ignored += 1;
            }
        }

        tracing::debug!(
            handled = report.handled,
            ignored = report.ignored,
            stream_closed = report.stream_closed,
            "event consumer stopped"
        );
        report
    }

    /// Handle one event. Returns whether it concerned the held world.
    async fn handle(&self, event: HostEvent<H::World>) -> bool {
        let mut guard = self.session.lock().await;
        let kind = event.kind();

        if let Some(session) = event.world_session()
            && !guard.holds(session)
        {
            tracing::trace!(kind, %session, "ignoring event for other world");
            return false;
        }

        match event {
            HostEvent::WorldEnter { world } => {
                if let Some(held) = guard.current() {
                    // Trusted to succeed; a failure is only reported.
                    if let Err(e) = self.host.expose_world_for_join(held, &self.expose_path).await {
                        tracing::warn!(
                            session = %world.session_id(),
                            error = %e,
                            "failed to expose world"
                        );
                    }
                }
                self.trace.record_lossy(TraceCode::WorldEnter, world.session_id()).await;
            },
            HostEvent::SessionRequest { peer_id, session_id, .. } => {
                if let Some(held) = guard.current() {
                    self.host.accept_world_session(held, peer_id, session_id).await;
                }
            },
            HostEvent::SessionReady { session_id, .. } => {
                self.trace.record_lossy(TraceCode::SessionJoin, session_id).await;
            },
            HostEvent::SessionClose { session_id, .. } => {
                self.trace.record_lossy(TraceCode::SessionLeave, session_id).await;
            },
            HostEvent::WorldLeave { world } => {
                guard.take();
                tracing::info!(session = %world.session_id(), "host left world");
                self.trace.record_lossy(TraceCode::WorldClose, world.session_id()).await;
            },
            HostEvent::ObjectAppend { .. } | HostEvent::ObjectDelete { .. } => return false,
            HostEvent::PeerConnected { peer_id }
            | HostEvent::PeerDisconnected { peer_id }
            | HostEvent::PeerFound { peer_id }
            | HostEvent::PeerForgot { peer_id } => {
                tracing::debug!(kind, peer = %String::from_utf8_lossy(&peer_id), "peer event");
                return false;
            },
        }

        true
    }
}
