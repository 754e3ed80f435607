//! Trace log.
//!
//! The trace is the observable output of a run: one line per protocol-level
//! event, `<unix_millis> <code> <subject>\n`. Both engine loops write to the
//! same log; each line is formatted up front and written as a single buffer
//! under the sink lock, so lines never interleave.

use std::{
    fmt,
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};

use crate::env::Environment;

/// Boxed output sink of a trace.
pub type TraceSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Event codes written to the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceCode {
    /// `E`: the held world was entered and exposed for joins.
    WorldEnter,
    /// `J`: a peer session became ready.
    SessionJoin,
    /// `L`: a peer session closed.
    SessionLeave,
    /// `X`: the held world was closed, deliberately or by failure.
    WorldClose,
}

impl TraceCode {
    /// Single-letter code.
    pub const fn as_char(self) -> char {
        match self {
            Self::WorldEnter => 'E',
            Self::SessionJoin => 'J',
            Self::SessionLeave => 'L',
            Self::WorldClose => 'X',
        }
    }

    /// Parse a single-letter code.
    pub const fn from_char(code: char) -> Option<Self> {
        match code {
            'E' => Some(Self::WorldEnter),
            'J' => Some(Self::SessionJoin),
            'L' => Some(Self::SessionLeave),
            'X' => Some(Self::WorldClose),
            _ => None,
        }
    }
}

impl fmt::Display for TraceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// A parsed trace line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceLine {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Event code.
    pub code: TraceCode,
    /// Subject id (a session id).
    pub subject: String,
}

impl TraceLine {
    /// Parse one line, without its terminating newline.
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.splitn(3, ' ');
        let timestamp_ms = fields.next()?.parse().ok()?;
        let mut code_chars = fields.next()?.chars();
        let code = TraceCode::from_char(code_chars.next()?)?;
        if code_chars.next().is_some() {
            return None;
        }
        let subject = fields.next()?.to_string();
        Some(Self { timestamp_ms, code, subject })
    }

    /// Parse a whole trace, skipping lines that do not parse.
    pub fn parse_all(trace: &str) -> Vec<Self> {
        trace.lines().filter_map(Self::parse).collect()
    }
}

impl fmt::Display for TraceLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.timestamp_ms, self.code, self.subject)
    }
}

/// Errors from the trace sink.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// The trace file could not be created.
    #[error("cannot open trace {path}: {source}")]
    Open {
        /// Path of the trace file.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A line could not be written.
    #[error("trace write failed: {0}")]
    Write(#[source] std::io::Error),

    /// The sink could not be flushed or shut down.
    #[error("trace close failed: {0}")]
    Close(#[source] std::io::Error),
}

/// Append-only trace shared by the engine loops.
pub struct TraceLog<E> {
    env: E,
    sink: Mutex<Option<TraceSink>>,
    lines: AtomicU64,
}

impl<E: Environment> TraceLog<E> {
    /// Trace into an already open sink.
    pub fn new(env: E, sink: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self { env, sink: Mutex::new(Some(Box::new(sink))), lines: AtomicU64::new(0) }
    }

    /// Create (or truncate) a trace file.
    pub async fn create(env: E, path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let path = path.as_ref();
        let file = tokio::fs::File::create(path)
            .await
            .map_err(|source| TraceError::Open { path: path.display().to_string(), source })?;
        Ok(Self::new(env, file))
    }

    /// Append one line stamped with the current wall clock.
    ///
    /// Returns `Ok(false)` without writing once the trace is closed.
    pub async fn record(
        &self,
        code: TraceCode,
        subject: impl fmt::Display,
    ) -> Result<bool, TraceError> {
        let mut sink = self.sink.lock().await;
        let Some(writer) = sink.as_mut() else {
            tracing::debug!(%code, %subject, "trace closed, dropping line");
            return Ok(false);
        };

        let line = format!("{} {} {}\n", self.env.unix_millis(), code, subject);
        writer.write_all(line.as_bytes()).await.map_err(TraceError::Write)?;
        writer.flush().await.map_err(TraceError::Write)?;
        self.lines.fetch_add(1, Ordering::Relaxed);

        Ok(true)
    }

    /// Append one line, logging a write failure instead of returning it.
    ///
    /// Trace writes from the engine loops never interrupt the timeline.
    pub async fn record_lossy(&self, code: TraceCode, subject: impl fmt::Display) {
        if let Err(e) = self.record(code, &subject).await {
            tracing::warn!(%code, %subject, error = %e, "trace write failed");
        }
    }

    /// Flush and close the sink. Later calls are no-ops.
    pub async fn close(&self) -> Result<(), TraceError> {
        let Some(mut writer) = self.sink.lock().await.take() else {
            return Ok(());
        };
        writer.flush().await.map_err(TraceError::Close)?;
        writer.shutdown().await.map_err(TraceError::Close)
    }

    /// Whether the sink has been closed.
    pub async fn is_closed(&self) -> bool {
        self.sink.lock().await.is_none()
    }

    /// Number of lines written so far.
    pub fn lines_written(&self) -> u64 {
        self.lines.load(Ordering::Relaxed)
    }
}

impl<E> fmt::Debug for TraceLog<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceLog").field("lines", &self.lines.load(Ordering::Relaxed)).finish()
    }
}
