//! In-memory trace sink shared between the engine and the test.

use std::{
    io,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
    task::{Context, Poll},
};

use tokio::io::AsyncWrite;
use worldline_core::TraceLine;

#[derive(Debug, Default)]
struct Buffer {
    bytes: Vec<u8>,
    shut_down: bool,
    failing: bool,
}

/// Shared byte buffer implementing `AsyncWrite`.
///
/// Hand one clone to the trace log and keep another to inspect the output.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<Buffer>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink whose writes, flushes and shutdown all fail, like a full disk.
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.buffer().failing = true;
        sink
    }

    /// Everything written so far, lossily decoded.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer().bytes).into_owned()
    }

    /// Written lines, parsed.
    pub fn lines(&self) -> Vec<TraceLine> {
        TraceLine::parse_all(&self.contents())
    }

    /// Whether the writer shut the sink down.
    pub fn is_shut_down(&self) -> bool {
        self.buffer().shut_down
    }

    fn buffer(&self) -> std::sync::MutexGuard<'_, Buffer> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AsyncWrite for MemorySink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut buffer = self.buffer();
        if buffer.failing {
            return Poll::Ready(Err(disk_full()));
        }
        if buffer.shut_down {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink shut down")));
        }
        buffer.bytes.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.buffer().failing {
            return Poll::Ready(Err(disk_full()));
        }
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut buffer = self.buffer();
        if buffer.failing {
            return Poll::Ready(Err(disk_full()));
        }
        buffer.shut_down = true;
        Poll::Ready(Ok(()))
    }
}

fn disk_full() -> io::Error {
    io::Error::other("disk full")
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;

    #[tokio::test]
    async fn writes_are_visible_through_clones() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();

        writer.write_all(b"10 E abc\n").await.unwrap();
        writer.shutdown().await.unwrap();

        assert_eq!(sink.contents(), "10 E abc\n");
        assert_eq!(sink.lines().len(), 1);
        assert!(sink.is_shut_down());
        assert!(writer.write_all(b"late").await.is_err());
    }

    #[tokio::test]
    async fn failing_sink_rejects_everything() {
        let sink = MemorySink::failing();
        let mut writer = sink.clone();

        assert!(writer.write_all(b"10 E abc\n").await.is_err());
        assert!(writer.flush().await.is_err());
        assert!(writer.shutdown().await.is_err());
        assert_eq!(sink.contents(), "");
        assert!(!sink.is_shut_down());
    }
}
