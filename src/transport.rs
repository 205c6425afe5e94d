//! NDJSON framing over the worker channel.
//!
//! One line is one frame. `serde_json` never emits a raw newline inside a
//! serialized document, so line boundaries are frame boundaries and a
//! partial read can never corrupt the next frame.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

use crate::error::{WorkerError, WorkerResult};
use crate::protocol::{RequestFrame, ResponseFrame};

/// Write half of a worker channel.
///
/// Not internally synchronized: concurrent submitters must serialize their
/// access at the frame boundary (the connection wraps it in a mutex).
pub struct FrameWriter {
    inner: BufWriter<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl std::fmt::Debug for FrameWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameWriter").finish_non_exhaustive()
    }
}

impl FrameWriter {
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            inner: BufWriter::new(Box::new(writer)),
        }
    }

    /// Serialize one frame, write it, and flush so the worker sees it
    /// immediately.
    pub async fn send(&mut self, frame: &RequestFrame) -> WorkerResult<()> {
        let mut line = serde_json::to_string(frame).map_err(WorkerError::SerializeFailed)?;
        line.push('\n');
        self.inner
            .write_all(line.as_bytes())
            .await
            .map_err(WorkerError::WriteFailed)?;
        self.inner.flush().await.map_err(WorkerError::WriteFailed)
    }
}

/// Read half of a worker channel. Owned by the channel's single reader.
pub struct FrameReader {
    inner: BufReader<Box<dyn AsyncRead + Send + Unpin>>,
    line: String,
}

impl FrameReader {
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            inner: BufReader::new(Box::new(reader)),
            line: String::new(),
        }
    }

    /// Read the next frame. `Ok(None)` is a clean end of stream.
    ///
    /// A line that does not parse as a frame is reported as
    /// [`WorkerError::MalformedFrame`]; recovery is the caller's decision
    /// (the protocol driver treats it as fatal).
    pub async fn recv(&mut self) -> WorkerResult<Option<ResponseFrame>> {
        loop {
            self.line.clear();
            let n = self
                .inner
                .read_line(&mut self.line)
                .await
                .map_err(WorkerError::ReadFailed)?;
            if n == 0 {
                return Ok(None);
            }
            let line = self.line.trim();
            if line.is_empty() {
                continue;
            }
            let frame = serde_json::from_str(line).map_err(WorkerError::MalformedFrame)?;
            return Ok(Some(frame));
        }
    }
}

/// In-memory channel pair for tests and in-process workers.
///
/// Returns the host-side framing halves plus the raw worker end of the
/// stream.
pub fn pair(capacity: usize) -> (FrameWriter, FrameReader, tokio::io::DuplexStream) {
    let (host, worker) = tokio::io::duplex(capacity);
    let (read_half, write_half) = tokio::io::split(host);
    (
        FrameWriter::new(write_half),
        FrameReader::new(read_half),
        worker,
    )
}
