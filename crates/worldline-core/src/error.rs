//! Engine error types.

use thiserror::Error;

use crate::{contact::ContactError, session::SessionError, trace::TraceError};

/// Errors that end an engine run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A contact artifact required by an `add`, `dial` or `join` step is
    /// unreadable.
    #[error("contact store: {0}")]
    Contact(#[from] ContactError),

    /// The trace sink failed.
    #[error("trace: {0}")]
    Trace(#[from] TraceError),

    /// The host's event stream was already taken by someone else.
    #[error("host event stream unavailable")]
    EventStreamUnavailable,

    /// The session slot was used out of order.
    #[error("session state: {0}")]
    Session(#[from] SessionError),
}

impl EngineError {
    /// Returns true if the run must be aborted with a diagnostic.
    ///
    /// Trace write and close failures are not fatal; the lines written before
    /// the failure are intact.
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Contact(_)
            | Self::EventStreamUnavailable
            | Self::Session(_)
            | Self::Trace(TraceError::Open { .. }) => true,
            Self::Trace(TraceError::Write(_) | TraceError::Close(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{contact::ContactArtifact, host::SessionId};

    #[test]
    fn missing_contact_is_fatal() {
        let err = EngineError::from(ContactError::Read {
            peer: "p1".to_string(),
            artifact: ContactArtifact::Identity,
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        });
        assert!(err.is_fatal());
        assert!(err.to_string().starts_with("contact store: cannot read identity hash"));
    }

    #[test]
    fn trace_close_failure_is_not_fatal() {
        let err = EngineError::from(TraceError::Close(std::io::Error::other("disk full")));
        assert!(!err.is_fatal());
    }

    #[test]
    fn occupied_slot_is_fatal() {
        let err = EngineError::from(SessionError::Occupied {
            held: SessionId::from_u128(1),
            incoming: SessionId::from_u128(2),
        });
        assert!(err.is_fatal());
    }
}
