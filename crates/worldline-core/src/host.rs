//! Host facade.
//!
//! The protocol participant under test is an external collaborator. The engine
//! only ever talks to it through the [`Host`] trait: a narrow operation set for
//! peers and worlds plus one inbound stream of [`HostEvent`]s.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifier of a world session or of a peer's session inside a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Build a session id from its 128-bit value.
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

/// Handle to a world joined or hosted by the host.
///
/// Worlds are created by the host and handed to the engine; the engine never
/// constructs one. Two handles refer to the same world when their session ids
/// are equal.
pub trait World: Clone + Send + Sync + 'static {
    /// Stable session id of this world.
    fn session_id(&self) -> SessionId;
}

/// Contact material a peer publishes so others can reach it.
#[derive(Clone, PartialEq, Eq)]
pub struct ContactCard {
    /// Root certificate.
    pub root_certificate: Bytes,
    /// Handshake key certificate.
    pub handshake_certificate: Bytes,
    /// Identity hash used to dial and join.
    pub identity: Bytes,
}

impl fmt::Debug for ContactCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContactCard")
            .field("root_certificate", &format!("<{} bytes>", self.root_certificate.len()))
            .field("handshake_certificate", &format!("<{} bytes>", self.handshake_certificate.len()))
            .field("identity", &String::from_utf8_lossy(&self.identity))
            .finish()
    }
}

/// Events emitted by the host.
///
/// Every world-scoped variant carries the handle of the world it concerns so
/// the consumer can match it against the currently held world.
#[derive(Debug, Clone)]
pub enum HostEvent<W> {
    /// The host entered a world (after a join or an open).
    WorldEnter {
        /// World that was entered.
        world: W,
    },

    /// A peer asks to participate in a world.
    SessionRequest {
        /// Target world.
        world: W,
        /// Requesting peer.
        peer_id: Bytes,
        /// Session the peer would use.
        session_id: SessionId,
    },

    /// A peer session became ready.
    SessionReady {
        /// World the session belongs to.
        world: W,
        /// Peer owning the session.
        peer_id: Bytes,
        /// Ready session.
        session_id: SessionId,
    },

    /// A peer session closed.
    SessionClose {
        /// World the session belonged to.
        world: W,
        /// Peer owning the session.
        peer_id: Bytes,
        /// Closed session.
        session_id: SessionId,
    },

    /// The host left a world: asynchronous join failure or forced departure.
    WorldLeave {
        /// World that was left.
        world: W,
    },

    /// An object was appended to a world.
    ObjectAppend {
        /// World the object lives in.
        world: W,
        /// Peer that appended it.
        peer_id: Bytes,
    },

    /// An object was deleted from a world.
    ObjectDelete {
        /// World the object lived in.
        world: W,
        /// Peer that deleted it.
        peer_id: Bytes,
    },

    /// A transport connection to a peer was established.
    PeerConnected {
        /// Connected peer.
        peer_id: Bytes,
    },

    /// A transport connection to a peer was lost.
    PeerDisconnected {
        /// Disconnected peer.
        peer_id: Bytes,
    },

    /// A peer became known through discovery.
    PeerFound {
        /// Discovered peer.
        peer_id: Bytes,
    },

    /// A previously known peer was forgotten.
    PeerForgot {
        /// Forgotten peer.
        peer_id: Bytes,
    },
}

impl<W: World> HostEvent<W> {
    /// Session id of the world this event concerns, if it is world-scoped.
    pub fn world_session(&self) -> Option<SessionId> {
        match self {
            Self::WorldEnter { world }
            | Self::SessionRequest { world, .. }
            | Self::SessionReady { world, .. }
            | Self::SessionClose { world, .. }
            | Self::WorldLeave { world }
            | Self::ObjectAppend { world, .. }
            | Self::ObjectDelete { world, .. } => Some(world.session_id()),
            Self::PeerConnected { .. }
            | Self::PeerDisconnected { .. }
            | Self::PeerFound { .. }
            | Self::PeerForgot { .. } => None,
        }
    }

    /// Short name for diagnostics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::WorldEnter { .. } => "world_enter",
            Self::SessionRequest { .. } => "session_request",
            Self::SessionReady { .. } => "session_ready",
            Self::SessionClose { .. } => "session_close",
            Self::WorldLeave { .. } => "world_leave",
            Self::ObjectAppend { .. } => "object_append",
            Self::ObjectDelete { .. } => "object_delete",
            Self::PeerConnected { .. } => "peer_connected",
            Self::PeerDisconnected { .. } => "peer_disconnected",
            Self::PeerFound { .. } => "peer_found",
            Self::PeerForgot { .. } => "peer_forgot",
        }
    }
}

/// Inbound event stream of a host. Ends when the host shuts down.
pub type EventStream<W> = mpsc::UnboundedReceiver<HostEvent<W>>;

/// Errors reported by host operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// The target peer is not reachable (unknown, not dialed, not ready).
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    /// The peer refused the request.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The world path is already in use or malformed.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The host has shut down.
    #[error("host closed")]
    Closed,
}

/// Operations the engine needs from the protocol host.
///
/// Failures of `append_known_peer`, `dial` and `expose_world_for_join` are
/// reported but not acted upon by the engine; only `join_world` is retried.
#[async_trait]
pub trait Host: Send + Sync + 'static {
    /// World handle type produced by this host.
    type World: World;

    /// Contact material of the host itself.
    fn local_contact(&self) -> ContactCard;

    /// Register a peer by its certificates.
    async fn append_known_peer(
        &self,
        root_certificate: Bytes,
        handshake_certificate: Bytes,
    ) -> Result<(), HostError>;

    /// Initiate a connection to a peer.
    async fn dial(&self, identity: Bytes) -> Result<(), HostError>;

    /// Join the world a peer exposes at `path`.
    async fn join_world(&self, identity: Bytes, path: &str) -> Result<Self::World, HostError>;

    /// Create and host a new world for the given resource locator.
    async fn open_world(&self, url: &str) -> Self::World;

    /// Release a world. Called at most once per held handle.
    async fn close_world(&self, world: &Self::World);

    /// Make a held world joinable by peers at `path`.
    async fn expose_world_for_join(&self, world: &Self::World, path: &str)
    -> Result<(), HostError>;

    /// Admit a peer session into a world.
    async fn accept_world_session(&self, world: &Self::World, peer_id: Bytes, session_id: SessionId);

    /// Take the inbound event stream. Returns `None` once it has been taken.
    fn event_stream(&self) -> Option<EventStream<Self::World>>;
}
