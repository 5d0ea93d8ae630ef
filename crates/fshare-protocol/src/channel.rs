//! Framed channel over a raw byte stream.
//!
//! The control plane is line-oriented (`\n`-terminated UTF-8); binary
//! payloads are exact byte counts announced by a preceding line. The read
//! side owns a single read-ahead buffer, so surplus bytes that arrive with a
//! line stay available for the next `recv_exact`. The write side sits behind
//! an async mutex shared by every producer on the connection (command
//! replies and notifications pushed by other sessions).
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Buffer slicing goes through `get()`
//! - Stream closure is surfaced as `ChannelError::ConnectionLost`

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::trace;

use crate::reply::DATA_PREFIX;

/// Maximum control line length in bytes (terminator excluded).
pub const MAX_LINE_LEN: usize = 8 * 1024;

/// Size of the chunks payloads are moved in.
pub const DATA_CHUNK_SIZE: usize = 64 * 1024;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Deadlines and limits applied to a channel.
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    /// Bound on each individual read from the stream (`None` = wait forever)
    pub read_timeout: Option<Duration>,
    /// Bound on each write-and-flush (`None` = wait forever)
    pub write_timeout: Option<Duration>,
    /// Longest accepted control line
    pub max_line_len: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            read_timeout: None,
            write_timeout: None,
            max_line_len: MAX_LINE_LEN,
        }
    }
}

/// Errors raised by channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Connection lost")]
    ConnectionLost,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Timed out waiting for peer")]
    Timeout,

    #[error("Line too long (max: {max} bytes)")]
    LineTooLong { max: usize },

    #[error("Line is not valid UTF-8")]
    InvalidUtf8,

    #[error("Channel closed")]
    Closed,
}

impl ChannelError {
    /// Whether the stream is unusable after this error.
    ///
    /// Only an undecodable line leaves the framing intact.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ChannelError::InvalidUtf8)
    }
}

/// Failure of [`FrameReader::copy_exact`].
#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    /// The source stream failed; framing is lost
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The sink failed; the remaining payload was drained and discarded
    #[error("Failed to write payload: {0}")]
    Sink(io::Error),
}

// ============================================================================
// Read Side
// ============================================================================

/// Read half of a framed channel.
pub struct FrameReader {
    inner: BufReader<BoxedReader>,
    read_timeout: Option<Duration>,
    max_line_len: usize,
}

impl FrameReader {
    /// Wraps a reader.
    pub fn new<R>(reader: R, config: ChannelConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let reader: BoxedReader = Box::new(reader);
        Self {
            inner: BufReader::with_capacity(DATA_CHUNK_SIZE, reader),
            read_timeout: config.read_timeout,
            max_line_len: config.max_line_len,
        }
    }

    /// Returns buffered bytes, reading from the stream if the buffer is empty.
    ///
    /// An empty slice means end of stream.
    async fn fill(&mut self) -> Result<&[u8], ChannelError> {
        let read_timeout = self.read_timeout;
        let read = self.inner.fill_buf();
        let buf = match read_timeout {
            Some(limit) => timeout(limit, read)
                .await
                .map_err(|_| ChannelError::Timeout)?,
            None => read.await,
        }?;
        Ok(buf)
    }

    /// Receives one line, without its terminator.
    ///
    /// A trailing `\r` is stripped as well. Fails with `ConnectionLost` if
    /// the stream ends before the terminator arrives.
    pub async fn recv_line(&mut self) -> Result<String, ChannelError> {
        let max = self.max_line_len;
        let mut line = Vec::new();

        loop {
            let (complete, used) = {
                let available = self.fill().await?;
                if available.is_empty() {
                    return Err(ChannelError::ConnectionLost);
                }
                match available.iter().position(|&b| b == b'\n') {
                    Some(pos) => {
                        line.extend_from_slice(available.get(..pos).unwrap_or_default());
                        (true, pos + 1)
                    }
                    None => {
                        line.extend_from_slice(available);
                        (false, available.len())
                    }
                }
            };
            self.inner.consume(used);

            if line.len() > max {
                return Err(ChannelError::LineTooLong { max });
            }
            if complete {
                break;
            }
        }

        if line.last() == Some(&b'\r') {
            line.pop();
        }

        let line = String::from_utf8(line).map_err(|_| ChannelError::InvalidUtf8)?;
        trace!(len = line.len(), "Received line");
        Ok(line)
    }

    /// Receives exactly `n` bytes.
    ///
    /// Bytes beyond `n` that were already read stay buffered for the next
    /// call.
    pub async fn recv_exact(&mut self, n: usize) -> Result<Vec<u8>, ChannelError> {
        let mut out = Vec::with_capacity(n.min(DATA_CHUNK_SIZE));

        while out.len() < n {
            let used = {
                let available = self.fill().await?;
                if available.is_empty() {
                    return Err(ChannelError::ConnectionLost);
                }
                let take = available.len().min(n - out.len());
                out.extend_from_slice(available.get(..take).unwrap_or_default());
                take
            };
            self.inner.consume(used);
        }

        Ok(out)
    }

    /// Streams exactly `n` bytes into `sink` without holding them in memory.
    ///
    /// If the sink fails, the rest of the payload is still consumed from the
    /// stream (and dropped) so the next read starts at a line boundary.
    pub async fn copy_exact<W>(&mut self, n: u64, sink: &mut W) -> Result<(), CopyError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut remaining = n;
        let mut sink_error: Option<io::Error> = None;

        while remaining > 0 {
            let chunk = {
                let available = self.fill().await?;
                if available.is_empty() {
                    return Err(ChannelError::ConnectionLost.into());
                }
                let take = usize::try_from(remaining)
                    .unwrap_or(usize::MAX)
                    .min(available.len());
                available.get(..take).unwrap_or_default().to_vec()
            };
            self.inner.consume(chunk.len());
            remaining -= chunk.len() as u64;

            if sink_error.is_none() {
                if let Err(e) = sink.write_all(&chunk).await {
                    sink_error = Some(e);
                }
            }
        }

        if sink_error.is_none() {
            if let Err(e) = sink.flush().await {
                sink_error = Some(e);
            }
        }

        match sink_error {
            Some(e) => Err(CopyError::Sink(e)),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Write Side
// ============================================================================

struct WriterState {
    stream: BufWriter<BoxedWriter>,
    closed: bool,
}

/// Write half of a framed channel, shared between producers.
///
/// Every public method takes the lock once, so a line (or a data frame
/// header plus its payload) is never interleaved with another producer's
/// output.
pub struct FrameWriter {
    state: Mutex<WriterState>,
    write_timeout: Option<Duration>,
}

impl FrameWriter {
    /// Wraps a writer.
    pub fn new<W>(writer: W, config: ChannelConfig) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: BoxedWriter = Box::new(writer);
        Self {
            state: Mutex::new(WriterState {
                stream: BufWriter::new(writer),
                closed: false,
            }),
            write_timeout: config.write_timeout,
        }
    }

    /// Writes all parts contiguously and flushes.
    async fn write_parts(&self, parts: &[&[u8]]) -> Result<(), ChannelError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(ChannelError::Closed);
        }

        let result = {
            let stream = &mut state.stream;
            let write = async {
                for part in parts {
                    stream.write_all(part).await?;
                }
                stream.flush().await?;
                Ok::<(), io::Error>(())
            };

            match self.write_timeout {
                Some(limit) => match timeout(limit, write).await {
                    Ok(result) => result.map_err(ChannelError::from),
                    Err(_) => Err(ChannelError::Timeout),
                },
                None => write.await.map_err(ChannelError::from),
            }
        };

        // A partial frame may be on the wire; nothing after it can be trusted.
        if result.is_err() {
            state.closed = true;
        }
        result
    }

    /// Sends one line; the terminator is appended.
    pub async fn send_line(&self, line: &str) -> Result<(), ChannelError> {
        self.write_parts(&[line.as_bytes(), b"\n"]).await
    }

    /// Sends several lines as one uninterrupted block.
    pub async fn send_lines<S: AsRef<str>>(&self, lines: &[S]) -> Result<(), ChannelError> {
        let mut block = String::new();
        for line in lines {
            block.push_str(line.as_ref());
            block.push('\n');
        }
        self.write_parts(&[block.as_bytes()]).await
    }

    /// Sends raw bytes with no framing.
    pub async fn send_bytes(&self, bytes: &[u8]) -> Result<(), ChannelError> {
        self.write_parts(&[bytes]).await
    }

    /// Sends `DATA:<n>` followed by the `n` bytes of `chunk`.
    pub async fn send_data_frame(&self, chunk: &[u8]) -> Result<(), ChannelError> {
        let header = format!("{DATA_PREFIX}{}\n", chunk.len());
        self.write_parts(&[header.as_bytes(), chunk]).await
    }

    /// Marks the writer closed and shuts the stream down.
    ///
    /// Later sends fail with `ChannelError::Closed`. Idempotent.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        if let Err(e) = state.stream.shutdown().await {
            trace!(error = %e, "Stream shutdown failed");
        }
    }

    /// Whether `close` has been called or a write has failed.
    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}

// ============================================================================
// Framed Channel
// ============================================================================

/// A bidirectional framed channel: an exclusively owned reader plus a
/// shareable writer.
pub struct FramedChannel {
    reader: FrameReader,
    writer: Arc<FrameWriter>,
}

impl FramedChannel {
    /// Builds a channel from separate read and write halves.
    pub fn new<R, W>(reader: R, writer: W, config: ChannelConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: FrameReader::new(reader, config),
            writer: Arc::new(FrameWriter::new(writer, config)),
        }
    }

    /// Builds a channel over a TCP stream.
    pub fn from_tcp(stream: TcpStream, config: ChannelConfig) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer, config)
    }

    /// Builds a channel over any bidirectional stream.
    pub fn from_stream<S>(stream: S, config: ChannelConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer, config)
    }

    /// Returns a clone of the writer for use by other producers.
    pub fn writer_handle(&self) -> Arc<FrameWriter> {
        Arc::clone(&self.writer)
    }

    /// Returns the read half.
    pub fn reader(&mut self) -> &mut FrameReader {
        &mut self.reader
    }

    /// Splits the channel into its halves.
    pub fn into_parts(self) -> (FrameReader, Arc<FrameWriter>) {
        (self.reader, self.writer)
    }

    pub async fn send_line(&self, line: &str) -> Result<(), ChannelError> {
        self.writer.send_line(line).await
    }

    pub async fn send_bytes(&self, bytes: &[u8]) -> Result<(), ChannelError> {
        self.writer.send_bytes(bytes).await
    }

    pub async fn recv_line(&mut self) -> Result<String, ChannelError> {
        self.reader.recv_line().await
    }

    pub async fn recv_exact(&mut self, n: usize) -> Result<Vec<u8>, ChannelError> {
        self.reader.recv_exact(n).await
    }
}
