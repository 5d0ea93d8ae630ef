//! Per-connection session.
//!
//! Each accepted connection gets its own `Session` that:
//! - Performs the display-name handshake
//! - Reads one command line at a time and hands it to the dispatcher
//! - Tears down unconditionally when the loop ends, whatever the cause
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Connection errors are logged and result in graceful disconnect

use std::net::SocketAddr;
use std::sync::Arc;

use fshare_core::{DisplayName, DomainError};
use fshare_protocol::{
    announced_upload_size, messages, ChannelError, Command, CopyError, FrameReader, FrameWriter,
    FramedChannel, ServerLine,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatch::{CommandError, Dispatcher, Flow};
use super::ServerContext;
use crate::directory::SessionHandle;
use crate::events::EventKind;
use crate::storage::TempArtifact;

/// Reasons a session ended other than a clean EXIT or EOF.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid username: {0}")]
    InvalidName(#[from] DomainError),

    #[error("Username already in use: {0}")]
    NameConflict(DisplayName),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Command failed: {0}")]
    Command(#[from] CommandError),

    #[error("Server shutting down")]
    Shutdown,
}

/// The I/O state a command operates on.
pub struct SessionIo {
    /// Exclusively owned read half
    pub reader: FrameReader,
    /// Write half, shared with the session directory for notifications
    pub writer: Arc<FrameWriter>,
    /// Temporary artifact of an upload in progress
    pub in_flight: Option<TempArtifact>,
}

impl SessionIo {
    pub fn new(channel: FramedChannel) -> Self {
        let (reader, writer) = channel.into_parts();
        Self {
            reader,
            writer,
            in_flight: None,
        }
    }

    /// Reads and drops `size` payload bytes so the next read is a command.
    pub async fn discard_payload(&mut self, size: u64) -> Result<(), ChannelError> {
        match self.reader.copy_exact(size, &mut tokio::io::sink()).await {
            Ok(()) => Ok(()),
            Err(CopyError::Channel(e)) => Err(e),
            Err(CopyError::Sink(e)) => Err(ChannelError::Io(e)),
        }
    }

}

/// Writes one reply line.
///
/// Borrows only the writer so the session future stays `Send`: the reader
/// half is not `Sync`.
async fn send(writer: &FrameWriter, line: &ServerLine) -> Result<(), ChannelError> {
    writer.send_line(&line.to_string()).await
}

/// One connected client.
pub struct Session {
    /// Connection-unique id
    id: u64,

    /// Remote address
    peer: SocketAddr,

    /// Channel state
    io: SessionIo,

    /// Claimed display name (set by a successful handshake)
    name: Option<DisplayName>,

    /// Shared server state
    ctx: Arc<ServerContext>,

    /// Server shutdown signal
    cancel: CancellationToken,
}

impl Session {
    pub fn new(
        id: u64,
        peer: SocketAddr,
        channel: FramedChannel,
        ctx: Arc<ServerContext>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            peer,
            io: SessionIo::new(channel),
            name: None,
            ctx,
            cancel,
        }
    }

    /// Runs the session to completion.
    ///
    /// Performs the handshake, then processes commands until EXIT, EOF,
    /// a transport failure or shutdown. Teardown always runs.
    pub async fn run(mut self) {
        debug!(session = self.id, peer = %self.peer, "New client connected");

        match self.handshake().await {
            Ok(()) => {
                if let Err(e) = self.process_commands().await {
                    debug!(session = self.id, name = ?self.name, error = %e, "Session ended with error");
                }
            }
            Err(e) => {
                warn!(session = self.id, peer = %self.peer, error = %e, "Handshake failed");
            }
        }

        self.teardown().await;
    }

    /// Reads the requested display name and claims it.
    async fn handshake(&mut self) -> Result<(), SessionError> {
        let line = tokio::select! {
            _ = self.cancel.cancelled() => return Err(SessionError::Shutdown),
            line = self.io.reader.recv_line() => line,
        };

        let requested = match line {
            Ok(line) => DisplayName::new(line.trim()),
            Err(ChannelError::InvalidUtf8) => Err(DomainError::InvalidCharacter {
                field: "username",
                found: char::REPLACEMENT_CHARACTER,
            }),
            Err(e) => return Err(e.into()),
        };

        let name = match requested {
            Ok(name) => name,
            Err(e) => {
                let reason = format!("Invalid username: {e}");
                send(&self.io.writer, &ServerLine::error(reason.clone())).await?;
                self.reject(reason);
                return Err(e.into());
            }
        };

        let handle = SessionHandle::new(self.id, name.clone(), Arc::clone(&self.io.writer));
        if !self.ctx.directory.try_register(handle).await {
            send(&self.io.writer, &ServerLine::error(messages::NAME_IN_USE)).await?;
            self.reject(messages::NAME_IN_USE.to_string());
            return Err(SessionError::NameConflict(name));
        }
        self.name = Some(name.clone());

        send(&self.io.writer, &ServerLine::Ok).await?;

        info!(session = self.id, name = %name, peer = %self.peer, "Client connected");
        self.ctx.events.emit(EventKind::Connected {
            session: self.id,
            name,
            peer: self.peer,
        });
        Ok(())
    }

    fn reject(&self, reason: String) {
        self.ctx.events.emit(EventKind::Rejected {
            peer: self.peer,
            reason,
        });
    }

    /// Main command loop.
    async fn process_commands(&mut self) -> Result<(), SessionError> {
        let Some(name) = self.name.clone() else {
            return Ok(());
        };
        let dispatcher = Dispatcher::new(Arc::clone(&self.ctx));

        loop {
            let line = tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(session = self.id, "Session stopping for shutdown");
                    return Ok(());
                }
                line = self.io.reader.recv_line() => line,
            };

            let line = match line {
                Ok(line) => line,
                Err(ChannelError::ConnectionLost) => {
                    debug!(session = self.id, name = %name, "Client closed connection");
                    return Ok(());
                }
                Err(ChannelError::InvalidUtf8) => {
                    send(&self.io.writer, &ServerLine::error(messages::UNKNOWN_COMMAND)).await?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if line.trim().is_empty() {
                continue;
            }

            let command = match Command::parse(&line) {
                Ok(command) => command,
                Err(e) => {
                    if let Some(size) = announced_upload_size(&line) {
                        self.io.discard_payload(size).await?;
                    }
                    debug!(session = self.id, name = %name, error = %e, "Rejected command line");
                    self.ctx.events.emit(EventKind::CommandRejected {
                        name: name.clone(),
                        reason: e.to_string(),
                    });
                    send(&self.io.writer, &ServerLine::error(e.to_string())).await?;
                    continue;
                }
            };

            match dispatcher.dispatch(&name, &mut self.io, command).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => return Ok(()),
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    debug!(session = self.id, name = %name, error = ?e, "Command failed");
                    if !matches!(e, CommandError::StorageFailure { .. }) {
                        self.ctx.events.emit(EventKind::CommandRejected {
                            name: name.clone(),
                            reason: e.to_string(),
                        });
                    }
                    send(&self.io.writer, &ServerLine::error(e.to_string())).await?;
                }
            }
        }
    }

    /// Releases everything the session holds.
    async fn teardown(&mut self) {
        if let Some(temp) = self.io.in_flight.take() {
            self.ctx.storage.discard(&temp).await;
        }

        if let Some(name) = self.name.take() {
            self.ctx.directory.unregister(&name, self.id).await;
            info!(session = self.id, name = %name, "Client disconnected");
            self.ctx.events.emit(EventKind::Disconnected {
                session: self.id,
                name,
            });
        }

        self.io.writer.close().await;
    }
}
