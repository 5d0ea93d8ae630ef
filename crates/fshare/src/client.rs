//! Protocol client for the fshare server.
//!
//! This module provides the `Client` which handles:
//! - The display-name handshake
//! - A background reader task that demultiplexes server lines
//! - Request/reply operations (`UPLOAD`, `LIST`, `DOWNLOAD`, `DELETE`, `EXIT`)
//!
//! Notifications can arrive at any time, including in the middle of a
//! request. The reader task routes them to their own queue so a pending
//! request only ever sees its own replies.
//!
//! ```text
//!                 ┌──────────────────┐
//!  TCP ──────────▶│   reader task    │
//!                 └───┬─────┬─────┬──┘
//!      NOTIFICATION:  │     │     │  DATA:<n> + bytes
//!                     ▼     │     ▼
//!          notifications    │    data queue
//!                           ▼
//!              RESPONSE: / ERROR (reply queue)
//! ```
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fshare_core::{DisplayName, FileKey, FileName};
use fshare_protocol::{
    parse_list_entry, ChannelConfig, ChannelError, FrameReader, FrameWriter, FramedChannel,
    ServerLine, DATA_CHUNK_SIZE,
};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{ClientError, Result};

// ============================================================================
// Client
// ============================================================================

/// A connected, named fshare session.
///
/// Operations take `&mut self`: the protocol has one request in flight at a
/// time.
///
/// # Example
///
/// ```rust,ignore
/// use fshare_client::Client;
///
/// let name = "alice".parse()?;
/// let mut client = Client::connect("127.0.0.1:5050", &name).await?;
/// client.upload_bytes(&"hello.txt".parse()?, b"hello").await?;
/// for key in client.list().await? {
///     println!("{key}");
/// }
/// client.exit().await?;
/// ```
pub struct Client {
    /// Name claimed in the handshake
    name: DisplayName,

    /// Write half of the connection
    writer: Arc<FrameWriter>,

    /// `RESPONSE:` and `ERROR` lines, in arrival order
    replies: mpsc::UnboundedReceiver<ServerLine>,

    /// Payloads of `DATA:` frames (empty for the terminating `DATA:0`)
    data: mpsc::UnboundedReceiver<Vec<u8>>,

    /// Text of `NOTIFICATION:` lines
    notifications: mpsc::UnboundedReceiver<String>,

    /// Background demultiplexer
    reader_task: JoinHandle<()>,
}

impl Client {
    /// Connects to `addr` and claims `name`.
    pub async fn connect<A>(addr: A, name: &DisplayName) -> Result<Self>
    where
        A: ToSocketAddrs + std::fmt::Display,
    {
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| ClientError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        Self::handshake(
            FramedChannel::from_tcp(stream, ChannelConfig::default()),
            name,
        )
        .await
    }

    /// Performs the handshake over an already open channel.
    ///
    /// Notifications that arrive before `OK` are skipped.
    pub async fn handshake(mut channel: FramedChannel, name: &DisplayName) -> Result<Self> {
        channel.send_line(name.as_str()).await?;

        loop {
            let line = match channel.recv_line().await {
                Ok(line) => line,
                Err(ChannelError::ConnectionLost) => return Err(ClientError::ConnectionLost),
                Err(e) => return Err(e.into()),
            };
            match ServerLine::parse(&line) {
                ServerLine::Ok => break,
                ServerLine::Notification(text) => {
                    trace!(text = %text, "Skipping notification before handshake");
                }
                ServerLine::Error(message) => return Err(ClientError::Rejected(message)),
                other => {
                    return Err(ClientError::Protocol(format!(
                        "unexpected handshake reply {other}"
                    )))
                }
            }
        }

        let (reader, writer) = channel.into_parts();
        let (reply_tx, replies) = mpsc::unbounded_channel();
        let (data_tx, data) = mpsc::unbounded_channel();
        let (notify_tx, notifications) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(demultiplex(reader, reply_tx, data_tx, notify_tx));

        debug!(name = %name, "Connected");
        Ok(Self {
            name: name.clone(),
            writer,
            replies,
            data,
            notifications,
            reader_task,
        })
    }

    /// The name this session claimed.
    pub fn name(&self) -> &DisplayName {
        &self.name
    }

    /// Notifications received so far and in the future.
    ///
    /// The stream ends when the connection closes.
    pub fn notifications(&mut self) -> &mut mpsc::UnboundedReceiver<String> {
        &mut self.notifications
    }

    /// Uploads `contents` as `filename`, returning the server's confirmation.
    pub async fn upload_bytes(&mut self, filename: &FileName, contents: &[u8]) -> Result<String> {
        self.writer
            .send_line(&format!("UPLOAD {filename} {}", contents.len()))
            .await?;
        self.writer.send_bytes(contents).await?;
        self.expect_response().await
    }

    /// Uploads a local file under its own file name, streaming from disk.
    pub async fn upload_file(&mut self, path: &Path) -> Result<String> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ClientError::Protocol(format!("{} has no file name", path.display())))?;
        let filename = FileName::new(filename)?;

        let mut file = File::open(path).await?;
        let size = file.metadata().await?.len();

        self.upload_from(&filename, size, &mut file).await
    }

    /// Uploads exactly `size` bytes read from `source`.
    ///
    /// Once the size is announced the server reads that many bytes, so a
    /// source that fails or ends early leaves the connection unusable: the
    /// writer is closed and the error is fatal.
    pub async fn upload_from<R>(
        &mut self,
        filename: &FileName,
        size: u64,
        source: &mut R,
    ) -> Result<String>
    where
        R: AsyncRead + Unpin,
    {
        self.writer
            .send_line(&format!("UPLOAD {filename} {size}"))
            .await?;

        let mut remaining = size;
        let mut buf = vec![0u8; DATA_CHUNK_SIZE];
        while remaining > 0 {
            let want = usize::try_from(remaining)
                .unwrap_or(usize::MAX)
                .min(buf.len());
            let chunk = buf.get_mut(..want).unwrap_or_default();
            let n = match source.read(chunk).await {
                Ok(n) => n,
                Err(e) => {
                    self.writer.close().await;
                    return Err(ClientError::TransferAborted {
                        filename: filename.to_string(),
                        source: e,
                    });
                }
            };
            if n == 0 {
                // Source shrank after its size was announced
                self.writer.close().await;
                return Err(ClientError::Protocol(format!(
                    "{filename} changed size during upload"
                )));
            }
            self.writer
                .send_bytes(buf.get(..n).unwrap_or_default())
                .await?;
            remaining -= n as u64;
        }

        self.expect_response().await
    }

    /// Lists every shared file.
    pub async fn list(&mut self) -> Result<Vec<FileKey>> {
        self.writer.send_line("LIST").await?;

        let header = self.expect_response().await?;
        let count: usize = header
            .trim()
            .parse()
            .map_err(|_| ClientError::Protocol(format!("bad LIST count {header:?}")))?;

        let mut keys = Vec::with_capacity(count);
        for _ in 0..count {
            let entry = self.expect_response().await?;
            match parse_list_entry(&entry) {
                Some((filename, owner)) => keys.push(FileKey::new(filename, owner)),
                None => warn!(entry = %entry, "Skipping unparseable LIST entry"),
            }
        }
        Ok(keys)
    }

    /// Downloads a file into memory.
    pub async fn download(&mut self, filename: &FileName, owner: &DisplayName) -> Result<Vec<u8>> {
        let mut contents = Vec::new();
        self.download_into(filename, owner, &mut contents).await?;
        Ok(contents)
    }

    /// Downloads a file into `dir`, returning the path written.
    ///
    /// A partially written file is removed if the transfer fails.
    pub async fn download_to(
        &mut self,
        filename: &FileName,
        owner: &DisplayName,
        dir: &Path,
    ) -> Result<PathBuf> {
        let path = dir.join(filename.as_str());
        let mut file = File::create(&path).await?;

        match self.download_into(filename, owner, &mut file).await {
            Ok(()) => {
                file.sync_all().await?;
                Ok(path)
            }
            Err(e) => {
                drop(file);
                if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                    debug!(path = %path.display(), error = %remove_err, "Failed to remove partial download");
                }
                Err(e)
            }
        }
    }

    /// Deletes one of this session's files, returning the confirmation.
    pub async fn delete(&mut self, filename: &FileName) -> Result<String> {
        self.writer.send_line(&format!("DELETE {filename}")).await?;
        self.expect_response().await
    }

    /// Ends the session and waits for the server to close the connection.
    pub async fn exit(mut self) -> Result<()> {
        self.writer.send_line("EXIT").await?;
        if let Err(e) = (&mut self.reader_task).await {
            debug!(error = %e, "Reader task ended abnormally");
        }
        self.writer.close().await;
        Ok(())
    }

    async fn download_into<W>(
        &mut self,
        filename: &FileName,
        owner: &DisplayName,
        sink: &mut W,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        self.writer
            .send_line(&format!("DOWNLOAD {filename} {owner}"))
            .await?;

        let header = self.expect_response().await?;
        let size: u64 = header
            .trim()
            .parse()
            .map_err(|_| ClientError::Protocol(format!("bad DOWNLOAD size {header:?}")))?;

        // Every frame up to DATA:0 is consumed even after the sink fails, so
        // the next request does not see this transfer's tail.
        let mut received = 0u64;
        let mut sink_error = None;
        loop {
            let chunk = self.data.recv().await.ok_or(ClientError::ConnectionLost)?;
            if chunk.is_empty() {
                break;
            }
            received += chunk.len() as u64;
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

        if let Some(e) = sink_error {
            return Err(e.into());
        }
        if received != size {
            return Err(ClientError::Protocol(format!(
                "announced {size} bytes but received {received}"
            )));
        }
        Ok(())
    }

    /// Waits for the reply to the request in flight.
    async fn expect_response(&mut self) -> Result<String> {
        match self.replies.recv().await {
            Some(ServerLine::Response(payload)) => Ok(payload),
            Some(ServerLine::Error(message)) => Err(ClientError::Server(message)),
            Some(other) => Err(ClientError::Protocol(format!("unexpected reply {other}"))),
            None => Err(ClientError::ConnectionLost),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Routes each incoming line to its queue until the connection ends.
async fn demultiplex(
    mut reader: FrameReader,
    replies: mpsc::UnboundedSender<ServerLine>,
    data: mpsc::UnboundedSender<Vec<u8>>,
    notifications: mpsc::UnboundedSender<String>,
) {
    loop {
        let line = match reader.recv_line().await {
            Ok(line) => line,
            Err(ChannelError::InvalidUtf8) => {
                warn!("Ignoring undecodable line from server");
                continue;
            }
            Err(ChannelError::ConnectionLost) => {
                debug!("Server closed connection");
                return;
            }
            Err(e) => {
                debug!(error = %e, "Connection failed");
                return;
            }
        };

        match ServerLine::parse(&line) {
            ServerLine::Notification(text) => {
                let _ = notifications.send(text);
            }
            ServerLine::Data(n) => {
                let payload = match reader.recv_exact(n).await {
                    Ok(payload) => payload,
                    Err(e) => {
                        debug!(error = %e, len = n, "Connection failed inside data frame");
                        return;
                    }
                };
                let _ = data.send(payload);
            }
            other => {
                let _ = replies.send(other);
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
