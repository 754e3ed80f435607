//! Shared "current world" state.
//!
//! Exactly one mutable resource is shared by the timeline and the event
//! consumer: the world the host currently holds on behalf of the scenario.
//! It lives behind a single async lock; both loops take the lock for the
//! shortest span that covers one host call and one trace write.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use tokio::sync::{Mutex, MutexGuard};

use crate::host::{SessionId, World};

/// Errors from session slot transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// A world was installed while another one was still held.
    #[error("world {held} still held while installing {incoming}")]
    Occupied {
        /// Session of the held world.
        held: SessionId,
        /// Session of the world being installed.
        incoming: SessionId,
    },
}

#[derive(Debug)]
struct Slot<W> {
    current: Option<W>,
}

/// Lock-guarded reference to the currently held world.
///
/// Cloning is cheap and yields a handle to the same slot.
#[derive(Debug)]
pub struct SharedSession<W> {
    slot: Arc<Mutex<Slot<W>>>,
    installs: Arc<AtomicU64>,
}

impl<W> Clone for SharedSession<W> {
    fn clone(&self) -> Self {
        Self { slot: Arc::clone(&self.slot), installs: Arc::clone(&self.installs) }
    }
}

impl<W: World> Default for SharedSession<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: World> SharedSession<W> {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot { current: None })),
            installs: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Acquire the slot.
    pub async fn lock(&self) -> SessionGuard<'_, W> {
        SessionGuard { slot: self.slot.lock().await, installs: &self.installs }
    }

    /// Session id of the held world, if any.
    pub async fn current_session(&self) -> Option<SessionId> {
        self.lock().await.current_session()
    }

    /// Total number of worlds installed over the slot's lifetime.
    pub fn installs(&self) -> u64 {
        self.installs.load(Ordering::Relaxed)
    }
}

/// Exclusive access to the slot.
pub struct SessionGuard<'a, W> {
    slot: MutexGuard<'a, Slot<W>>,
    installs: &'a AtomicU64,
}

impl<W: World> SessionGuard<'_, W> {
    /// The held world, if any.
    pub fn current(&self) -> Option<&W> {
        self.slot.current.as_ref()
    }

    /// Session id of the held world, if any.
    pub fn current_session(&self) -> Option<SessionId> {
        self.slot.current.as_ref().map(World::session_id)
    }

    /// Whether the held world has the given session id.
    pub fn holds(&self, session: SessionId) -> bool {
        self.current_session() == Some(session)
    }

    /// Install a world into an empty slot.
    ///
    /// A held world must be released with [`take`](Self::take) first.
    pub fn install(&mut self, world: W) -> Result<(), SessionError> {
        if let Some(held) = self.current_session() {
            return Err(SessionError::Occupied { held, incoming: world.session_id() });
        }
        self.slot.current = Some(world);
        self.installs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Remove and return the held world.
    pub fn take(&mut self) -> Option<W> {
        self.slot.current.take()
    }
}
