//! Scriptable in-process host.
//!
//! `SimHost` implements the [`Host`] facade without any networking. Worlds are
//! plain session ids drawn from a seeded RNG, and the host reacts to opens and
//! joins by emitting a configurable list of events. Every call is recorded
//! with its time so tests can check what the engine asked for and when.
//!
//! # Fault injection
//!
//! - `join_failures(n)`: the first `n` join attempts fail
//! - `fail_all_joins()`: every join attempt fails
//! - `on_open` / `on_join` with [`Reaction::LeaveWorld`]: the host drops the
//!   world right after handing it out
//!
//! # Invariant tracking
//!
//! The host counts worlds it has handed out and not yet taken back (closed by
//! the engine or left by the host). `max_live_worlds()` is the high-water mark
//! of that count; a correct engine never exceeds one.

use std::{
    collections::HashSet,
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use bytes::Bytes;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::{sync::mpsc, time::Instant};
use worldline_core::{ContactCard, EventStream, Host, HostError, HostEvent, SessionId, World};

/// World handle produced by [`SimHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimWorld {
    session_id: SessionId,
    origin: WorldOrigin,
}

impl SimWorld {
    /// Handle for `session_id` that no host handed out.
    ///
    /// Useful to inject events about foreign worlds, or about a held world
    /// whose session id is known from the call log.
    pub const fn detached(session_id: SessionId) -> Self {
        Self { session_id, origin: WorldOrigin::Detached }
    }

    /// How the world came to be held.
    pub const fn origin(&self) -> &WorldOrigin {
        &self.origin
    }
}

impl World for SimWorld {
    fn session_id(&self) -> SessionId {
        self.session_id
    }
}

/// How a [`SimWorld`] was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorldOrigin {
    /// Hosted locally for the given locator.
    Opened {
        /// Resource locator.
        url: String,
    },
    /// Joined from a peer.
    Joined {
        /// Identity hash of the peer.
        identity: Bytes,
    },
    /// Built with [`SimWorld::detached`].
    Detached,
}

/// Event the host emits after handing out a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    /// Emit `WorldEnter`.
    EnterWorld,
    /// Emit `SessionRequest` from a fresh peer.
    RequestSession,
    /// Emit `WorldLeave` and forget the world.
    LeaveWorld,
    /// Emit `ObjectAppend`.
    AppendObject,
    /// Emit `ObjectDelete`.
    DeleteObject,
}

/// A recorded host call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    /// `append_known_peer`.
    AppendKnownPeer {
        /// Root certificate.
        root_certificate: Bytes,
        /// Handshake certificate.
        handshake_certificate: Bytes,
    },
    /// `dial`.
    Dial {
        /// Dialed identity.
        identity: Bytes,
    },
    /// `join_world`, with its outcome.
    JoinWorld {
        /// Peer identity.
        identity: Bytes,
        /// Requested path.
        path: String,
        /// Session of the joined world, `None` if the attempt failed.
        joined: Option<SessionId>,
    },
    /// `open_world`.
    OpenWorld {
        /// Resource locator.
        url: String,
        /// Session of the new world.
        session: SessionId,
    },
    /// `close_world`.
    CloseWorld {
        /// Session of the closed world.
        session: SessionId,
    },
    /// `expose_world_for_join`.
    ExposeWorld {
        /// Session of the exposed world.
        session: SessionId,
        /// Exposure path.
        path: String,
    },
    /// `accept_world_session`.
    AcceptSession {
        /// World session.
        world: SessionId,
        /// Accepted peer.
        peer_id: Bytes,
        /// Accepted peer session.
        session_id: SessionId,
    },
}

/// A host call with the tokio time at which it was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedCall {
    /// When the call was made.
    pub at: Instant,
    /// The call.
    pub call: HostCall,
}

/// Behavior of a [`SimHost`].
#[derive(Debug, Clone)]
pub struct SimHostConfig {
    /// Name used to derive the host's contact card.
    pub name: String,
    /// RNG seed for session and peer ids.
    pub seed: u64,
    /// Join attempts that fail before joins start succeeding.
    /// `u32::MAX` makes every attempt fail.
    pub join_failures: u32,
    /// Events emitted after `open_world`.
    pub on_open: Vec<Reaction>,
    /// Events emitted after a successful `join_world`.
    pub on_join: Vec<Reaction>,
    /// Emit `SessionReady` when a session request is accepted.
    pub ready_on_accept: bool,
    /// Emit `PeerConnected` when a peer is dialed.
    pub connect_on_dial: bool,
}

impl Default for SimHostConfig {
    fn default() -> Self {
        Self {
            name: "sim".to_string(),
            seed: 0,
            join_failures: 0,
            on_open: Vec::new(),
            on_join: Vec::new(),
            ready_on_accept: true,
            connect_on_dial: true,
        }
    }
}

/// Builder for [`SimHost`].
#[derive(Debug, Clone, Default)]
pub struct SimHostBuilder {
    config: SimHostConfig,
}

impl SimHostBuilder {
    /// Host name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// RNG seed.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Fail the first `count` join attempts.
    #[must_use]
    pub fn join_failures(mut self, count: u32) -> Self {
        self.config.join_failures = count;
        self
    }

    /// Fail every join attempt.
    #[must_use]
    pub fn fail_all_joins(mut self) -> Self {
        self.config.join_failures = u32::MAX;
        self
    }

    /// Events emitted after `open_world`.
    #[must_use]
    pub fn on_open(mut self, reactions: impl IntoIterator<Item = Reaction>) -> Self {
        self.config.on_open = reactions.into_iter().collect();
        self
    }

    /// Events emitted after a successful `join_world`.
    #[must_use]
    pub fn on_join(mut self, reactions: impl IntoIterator<Item = Reaction>) -> Self {
        self.config.on_join = reactions.into_iter().collect();
        self
    }

    /// Whether accepting a session makes it ready.
    #[must_use]
    pub fn ready_on_accept(mut self, ready: bool) -> Self {
        self.config.ready_on_accept = ready;
        self
    }

    /// Build the host.
    pub fn build(self) -> SimHost {
        SimHost::with_config(self.config)
    }
}

struct SimState {
    rng: ChaCha8Rng,
    config: SimHostConfig,
    join_failures_left: u32,
    calls: Vec<TimedCall>,
    live: HashSet<SessionId>,
    max_live: usize,
    next_peer: u64,
}

impl SimState {
    fn record(&mut self, call: HostCall) {
        self.calls.push(TimedCall { at: Instant::now(), call });
    }

    fn fresh_session(&mut self) -> SessionId {
        SessionId::from_u128(self.rng.r#gen())
    }

    fn hand_out(&mut self, world: &SimWorld) {
        self.live.insert(world.session_id);
        self.max_live = self.max_live.max(self.live.len());
    }
}

/// In-process host for simulations and loopback runs.
pub struct SimHost {
    state: Mutex<SimState>,
    sender: Mutex<Option<mpsc::UnboundedSender<HostEvent<SimWorld>>>>,
    events: Mutex<Option<EventStream<SimWorld>>>,
}

impl Default for SimHost {
    fn default() -> Self {
        Self::with_config(SimHostConfig::default())
    }
}

impl SimHost {
    /// Start building a host.
    pub fn builder() -> SimHostBuilder {
        SimHostBuilder::default()
    }

    /// Host that behaves like a live peer: entered worlds are announced and a
    /// fresh peer asks to join every world the host holds.
    pub fn loopback(name: impl Into<String>) -> Self {
        Self::builder()
            .name(name)
            .on_open([Reaction::EnterWorld, Reaction::RequestSession])
            .on_join([Reaction::EnterWorld, Reaction::RequestSession])
            .build()
    }

    /// Create a host from a configuration.
    pub fn with_config(config: SimHostConfig) -> Self {
        let (sender, events) = mpsc::unbounded_channel();
        let state = SimState {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            join_failures_left: config.join_failures,
            config,
            calls: Vec::new(),
            live: HashSet::new(),
            max_live: 0,
            next_peer: 0,
        };
        Self {
            state: Mutex::new(state),
            sender: Mutex::new(Some(sender)),
            events: Mutex::new(Some(events)),
        }
    }

    /// Emit an arbitrary event.
    pub fn emit(&self, event: HostEvent<SimWorld>) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = sender.as_ref()
            && sender.send(event).is_err()
        {
            tracing::debug!("event stream receiver dropped");
        }
    }

    /// Close the event stream, as a host shutting down would.
    pub fn shutdown(&self) {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    /// Recorded calls in order.
    pub fn calls(&self) -> Vec<HostCall> {
        self.state().calls.iter().map(|timed| timed.call.clone()).collect()
    }

    /// Recorded calls with their times.
    pub fn timed_calls(&self) -> Vec<TimedCall> {
        self.state().calls.clone()
    }

    /// Number of `join_world` calls.
    pub fn join_attempts(&self) -> usize {
        self.state().calls.iter().filter(|timed| matches!(timed.call, HostCall::JoinWorld { .. })).count()
    }

    /// Worlds handed out and not yet closed or left.
    pub fn live_worlds(&self) -> usize {
        self.state().live.len()
    }

    /// High-water mark of [`live_worlds`](Self::live_worlds).
    pub fn max_live_worlds(&self) -> usize {
        self.state().max_live
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Emit the configured reactions for a world that was just handed out.
    fn react(&self, world: &SimWorld, reactions: &[Reaction]) {
        for reaction in reactions {
            let event = match reaction {
                Reaction::EnterWorld => HostEvent::WorldEnter { world: world.clone() },
                Reaction::RequestSession => {
                    let (peer_id, session_id) = {
                        let mut state = self.state();
                        state.next_peer += 1;
                        let peer_id = Bytes::from(format!("peer-{}", state.next_peer));
                        (peer_id, state.fresh_session())
                    };
                    HostEvent::SessionRequest { world: world.clone(), peer_id, session_id }
                },
                Reaction::LeaveWorld => {
                    self.state().live.remove(&world.session_id);
                    HostEvent::WorldLeave { world: world.clone() }
                },
                Reaction::AppendObject => HostEvent::ObjectAppend {
                    world: world.clone(),
                    peer_id: Bytes::from_static(b"peer-0"),
                },
                Reaction::DeleteObject => HostEvent::ObjectDelete {
                    world: world.clone(),
                    peer_id: Bytes::from_static(b"peer-0"),
                },
            };
            self.emit(event);
        }
    }
}

#[async_trait]
impl Host for SimHost {
    type World = SimWorld;

    fn local_contact(&self) -> ContactCard {
        let name = self.state().config.name.clone();
        ContactCard {
            root_certificate: Bytes::from(format!("root-certificate:{name}")),
            handshake_certificate: Bytes::from(format!("handshake-certificate:{name}")),
            identity: Bytes::from(format!("identity:{name}")),
        }
    }

    async fn append_known_peer(
        &self,
        root_certificate: Bytes,
        handshake_certificate: Bytes,
    ) -> Result<(), HostError> {
        self.state().record(HostCall::AppendKnownPeer { root_certificate, handshake_certificate });
        Ok(())
    }

    async fn dial(&self, identity: Bytes) -> Result<(), HostError> {
        let connect = {
            let mut state = self.state();
            state.record(HostCall::Dial { identity: identity.clone() });
            state.config.connect_on_dial
        };
        if connect {
            self.emit(HostEvent::PeerConnected { peer_id: identity });
        }
        Ok(())
    }

    async fn join_world(&self, identity: Bytes, path: &str) -> Result<SimWorld, HostError> {
        let (result, reactions) = {
            let mut state = self.state();
            if state.join_failures_left > 0 {
                if state.join_failures_left != u32::MAX {
                    state.join_failures_left -= 1;
                }
                state.record(HostCall::JoinWorld {
                    identity: identity.clone(),
                    path: path.to_string(),
                    joined: None,
                });
                let peer = String::from_utf8_lossy(&identity).into_owned();
                return Err(HostError::Unreachable(peer));
            }

            let world = SimWorld {
                session_id: state.fresh_session(),
                origin: WorldOrigin::Joined { identity: identity.clone() },
            };
            state.record(HostCall::JoinWorld {
                identity,
                path: path.to_string(),
                joined: Some(world.session_id),
            });
            state.hand_out(&world);
            (world, state.config.on_join.clone())
        };

        self.react(&result, &reactions);
        Ok(result)
    }

    async fn open_world(&self, url: &str) -> SimWorld {
        let (world, reactions) = {
            let mut state = self.state();
            let world = SimWorld {
                session_id: state.fresh_session(),
                origin: WorldOrigin::Opened { url: url.to_string() },
            };
            state.record(HostCall::OpenWorld { url: url.to_string(), session: world.session_id });
            state.hand_out(&world);
            (world, state.config.on_open.clone())
        };

        self.react(&world, &reactions);
        world
    }

    async fn close_world(&self, world: &SimWorld) {
        let mut state = self.state();
        state.record(HostCall::CloseWorld { session: world.session_id });
        state.live.remove(&world.session_id);
    }

    async fn expose_world_for_join(&self, world: &SimWorld, path: &str) -> Result<(), HostError> {
        self.state().record(HostCall::ExposeWorld {
            session: world.session_id,
            path: path.to_string(),
        });
        Ok(())
    }

    async fn accept_world_session(&self, world: &SimWorld, peer_id: Bytes, session_id: SessionId) {
        let ready = {
            let mut state = self.state();
            state.record(HostCall::AcceptSession {
                world: world.session_id,
                peer_id: peer_id.clone(),
                session_id,
            });
            state.config.ready_on_accept
        };
        if ready {
            self.emit(HostEvent::SessionReady { world: world.clone(), peer_id, session_id });
        }
    }

    fn event_stream(&self) -> Option<EventStream<SimWorld>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}
