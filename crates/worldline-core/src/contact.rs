//! Contact store.
//!
//! Peers bootstrap connections without a central directory by exchanging
//! three artifacts per peer id through a shared store:
//!
//! - `<id>_rc`: root certificate
//! - `<id>_hs`: handshake key certificate
//! - `<id>_id`: identity hash
//!
//! Each artifact is read independently. A missing artifact means the scenario
//! setup is broken, so callers treat [`ContactError`] as fatal.

use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use bytes::Bytes;

use crate::host::ContactCard;

/// One of the three per-peer contact artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContactArtifact {
    /// Root certificate.
    RootCertificate,
    /// Handshake key certificate.
    HandshakeCertificate,
    /// Identity hash.
    Identity,
}

impl ContactArtifact {
    /// File name suffix of the artifact.
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::RootCertificate => "rc",
            Self::HandshakeCertificate => "hs",
            Self::Identity => "id",
        }
    }

    /// Key of the artifact for a given peer.
    pub fn key(self, peer: &str) -> String {
        format!("{peer}_{}", self.suffix())
    }
}

impl fmt::Display for ContactArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RootCertificate => f.write_str("root certificate"),
            Self::HandshakeCertificate => f.write_str("handshake certificate"),
            Self::Identity => f.write_str("identity hash"),
        }
    }
}

/// Errors from contact store access.
#[derive(Debug, thiserror::Error)]
pub enum ContactError {
    /// Artifact could not be read.
    #[error("cannot read {artifact} of peer {peer:?}: {source}")]
    Read {
        /// Peer id the artifact belongs to.
        peer: String,
        /// Artifact that failed.
        artifact: ContactArtifact,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// Artifact could not be written.
    #[error("cannot write {artifact} of peer {peer:?}: {source}")]
    Write {
        /// Peer id the artifact belongs to.
        peer: String,
        /// Artifact that failed.
        artifact: ContactArtifact,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
}

impl ContactError {
    /// Peer id the failure refers to.
    pub fn peer(&self) -> &str {
        match self {
            Self::Read { peer, .. } | Self::Write { peer, .. } => peer,
        }
    }
}

/// Read and publish per-peer contact artifacts.
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Read one artifact of `peer`.
    async fn read(&self, peer: &str, artifact: ContactArtifact) -> Result<Bytes, ContactError>;

    /// Write one artifact of `peer`, replacing any previous content.
    async fn write(
        &self,
        peer: &str,
        artifact: ContactArtifact,
        content: Bytes,
    ) -> Result<(), ContactError>;

    /// Publish all three artifacts of `peer`.
    async fn publish(&self, peer: &str, card: &ContactCard) -> Result<(), ContactError> {
        self.write(peer, ContactArtifact::RootCertificate, card.root_certificate.clone()).await?;
        self.write(peer, ContactArtifact::HandshakeCertificate, card.handshake_certificate.clone())
            .await?;
        self.write(peer, ContactArtifact::Identity, card.identity.clone()).await
    }
}

/// Contact store backed by a shared directory.
#[derive(Debug, Clone)]
pub struct DirContactStore {
    root: PathBuf,
}

impl DirContactStore {
    /// Use `root` as the contact directory. The directory is not created.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the artifacts.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of one artifact.
    pub fn path_of(&self, peer: &str, artifact: ContactArtifact) -> PathBuf {
        self.root.join(artifact.key(peer))
    }
}

#[async_trait]
impl ContactStore for DirContactStore {
    async fn read(&self, peer: &str, artifact: ContactArtifact) -> Result<Bytes, ContactError> {
        let path = self.path_of(peer, artifact);
        tokio::fs::read(&path).await.map(Bytes::from).map_err(|source| ContactError::Read {
            peer: peer.to_string(),
            artifact,
            source,
        })
    }

    async fn write(
        &self,
        peer: &str,
        artifact: ContactArtifact,
        content: Bytes,
    ) -> Result<(), ContactError> {
        let path = self.path_of(peer, artifact);
        tokio::fs::write(&path, &content).await.map_err(|source| ContactError::Write {
            peer: peer.to_string(),
            artifact,
            source,
        })
    }
}

/// In-memory contact store.
#[derive(Debug, Default)]
pub struct MemoryContactStore {
    artifacts: Mutex<HashMap<String, Bytes>>,
}

impl MemoryContactStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored artifacts.
    pub fn len(&self) -> usize {
        self.artifacts.lock().map_or(0, |artifacts| artifacts.len())
    }

    /// Whether the store holds no artifact.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContactStore for MemoryContactStore {
    async fn read(&self, peer: &str, artifact: ContactArtifact) -> Result<Bytes, ContactError> {
        let missing = || ContactError::Read {
            peer: peer.to_string(),
            artifact,
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        let artifacts = self.artifacts.lock().map_err(|_| missing())?;
        artifacts.get(&artifact.key(peer)).cloned().ok_or_else(missing)
    }

    async fn write(
        &self,
        peer: &str,
        artifact: ContactArtifact,
        content: Bytes,
    ) -> Result<(), ContactError> {
        let mut artifacts = self.artifacts.lock().map_err(|_| ContactError::Write {
            peer: peer.to_string(),
            artifact,
            source: std::io::Error::other("contact store poisoned"),
        })?;
        artifacts.insert(artifact.key(peer), content);
        Ok(())
    }
}
