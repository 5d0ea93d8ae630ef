//! Command dispatcher.
//!
//! Interprets one parsed command against the registry, the session
//! directory and the storage backend, and writes the replies. A returned
//! [`CommandError`] that is not fatal becomes an `ERROR` line and the
//! session carries on; a fatal one ends the session.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Storage and registry failures are mapped to `CommandError`

use std::sync::Arc;

use fshare_core::{DisplayName, FileKey, FileName};
use fshare_protocol::{messages, ChannelError, Command, CopyError, ServerLine, DATA_CHUNK_SIZE};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use super::session::SessionIo;
use super::ServerContext;
use crate::events::EventKind;
use crate::storage::StorageError;

/// What the session loop does after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Failure of a single command.
///
/// The `Display` text of a non-fatal error is the message sent after
/// `ERROR `.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The channel broke; the session cannot continue
    #[error("Connection lost: {0}")]
    ConnectionLost(#[from] ChannelError),

    /// An upload's payload stopped arriving part way through
    #[error("{filename} could not be uploaded. Connection lost.")]
    TransferAborted {
        filename: FileName,
        #[source]
        source: ChannelError,
    },

    /// The command was well formed but not acceptable
    #[error("{0}")]
    ProtocolViolation(String),

    /// The key is absent or not the caller's; the two are never told apart
    #[error("{0}")]
    NotFoundOrForbidden(&'static str),

    /// The storage backend or the registry log failed
    #[error("{message}")]
    StorageFailure { message: String, detail: String },
}

impl CommandError {
    /// Whether the session must end.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CommandError::ConnectionLost(_) | CommandError::TransferAborted { .. }
        )
    }

    fn storage(message: impl Into<String>, detail: impl ToString) -> Self {
        CommandError::StorageFailure {
            message: message.into(),
            detail: detail.to_string(),
        }
    }
}

/// Executes commands on behalf of one session.
pub struct Dispatcher {
    ctx: Arc<ServerContext>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self { ctx }
    }

    /// Executes `command` for the session identified as `who`.
    pub async fn dispatch(
        &self,
        who: &DisplayName,
        io: &mut SessionIo,
        command: Command,
    ) -> Result<Flow, CommandError> {
        debug!(name = %who, command = %command.verb(), "Dispatching command");

        match command {
            Command::Upload { filename, size } => self.upload(who, io, filename, size).await?,
            Command::List => self.list(who, io).await?,
            Command::Download { filename, owner } => {
                self.download(who, io, filename, owner).await?
            }
            Command::Delete { filename } => self.delete(who, io, filename).await?,
            Command::Exit => {
                debug!(name = %who, "Client requested exit");
                return Ok(Flow::Exit);
            }
        }

        Ok(Flow::Continue)
    }

    // ========================================================================
    // UPLOAD
    // ========================================================================

    async fn upload(
        &self,
        who: &DisplayName,
        io: &mut SessionIo,
        filename: FileName,
        size: u64,
    ) -> Result<(), CommandError> {
        let ctx = &self.ctx;
        let max = ctx.limits.max_upload_bytes;

        if size > max {
            io.discard_payload(size).await?;
            return Err(CommandError::ProtocolViolation(format!(
                "{filename} is too large (max: {max} bytes)."
            )));
        }

        let (temp, mut sink) = match ctx.storage.create_temp().await {
            Ok(created) => created,
            Err(e) => {
                io.discard_payload(size).await?;
                self.upload_failed(who, &filename, &e);
                return Err(CommandError::storage(
                    format!("{filename} could not be uploaded."),
                    e,
                ));
            }
        };
        io.in_flight = Some(temp.clone());

        let copied = io.reader.copy_exact(size, &mut sink).await;
        drop(sink);

        match copied {
            Ok(()) => {}
            Err(CopyError::Channel(source)) => {
                self.abandon_upload(io).await;
                self.upload_failed(who, &filename, &source);
                let notice = ServerLine::error(format!(
                    "{filename} could not be uploaded. Connection lost."
                ));
                // Usually fails too; the peer may still be reading.
                let _ = io.writer.send_line(&notice.to_string()).await;
                return Err(CommandError::TransferAborted { filename, source });
            }
            Err(CopyError::Sink(e)) => {
                self.abandon_upload(io).await;
                self.upload_failed(who, &filename, &e);
                return Err(CommandError::storage(
                    format!("{filename} could not be uploaded."),
                    e,
                ));
            }
        }

        let key = FileKey::new(filename.clone(), who.clone());
        let locator = key.locator();

        // Record first: until the log is persisted an existing artifact at
        // `locator` must keep its old bytes.
        let previous = match ctx.registry.insert(key.clone(), locator.clone()).await {
            Ok(previous) => previous,
            Err(e) => {
                self.abandon_upload(io).await;
                self.upload_failed(who, &filename, &e);
                return Err(CommandError::storage(
                    format!("{filename} could not be uploaded."),
                    e,
                ));
            }
        };

        if let Err(e) = ctx.storage.commit(&temp, &locator).await {
            self.abandon_upload(io).await;
            if previous.is_none() {
                // The fresh record would point at nothing.
                if let Err(remove_err) = ctx.registry.remove(key).await {
                    warn!(locator = %locator, error = %remove_err, "Failed to drop record of uncommitted upload");
                }
            }
            self.upload_failed(who, &filename, &e);
            return Err(CommandError::storage(
                format!("{filename} could not be uploaded."),
                e,
            ));
        }
        io.in_flight = None;

        io.writer
            .send_line(&ServerLine::uploaded(&filename).to_string())
            .await?;

        info!(name = %who, filename = %filename, size, "File uploaded");
        ctx.events.emit(EventKind::Uploaded {
            filename,
            owner: who.clone(),
            size,
        });
        Ok(())
    }

    /// Discards the session's in-flight temporary artifact.
    async fn abandon_upload(&self, io: &mut SessionIo) {
        if let Some(temp) = io.in_flight.take() {
            self.ctx.storage.discard(&temp).await;
        }
    }

    fn upload_failed(&self, who: &DisplayName, filename: &FileName, reason: &dyn std::fmt::Display) {
        warn!(name = %who, filename = %filename, error = %reason, "Upload failed");
        self.ctx.events.emit(EventKind::UploadFailed {
            filename: filename.clone(),
            owner: who.clone(),
            reason: reason.to_string(),
        });
    }

    // ========================================================================
    // LIST
    // ========================================================================

    async fn list(&self, who: &DisplayName, io: &mut SessionIo) -> Result<(), CommandError> {
        let keys = self
            .ctx
            .registry
            .snapshot()
            .await
            .map_err(|e| CommandError::storage("File list unavailable.", e))?;

        let mut lines = Vec::with_capacity(keys.len() + 1);
        lines.push(ServerLine::Response(keys.len().to_string()).to_string());
        lines.extend(
            keys.iter()
                .map(|key| ServerLine::Response(key.to_string()).to_string()),
        );
        io.writer.send_lines(&lines).await?;

        self.ctx.events.emit(EventKind::Listed {
            name: who.clone(),
            count: keys.len(),
        });
        Ok(())
    }

    // ========================================================================
    // DOWNLOAD
    // ========================================================================

    async fn download(
        &self,
        who: &DisplayName,
        io: &mut SessionIo,
        filename: FileName,
        owner: DisplayName,
    ) -> Result<(), CommandError> {
        let ctx = &self.ctx;
        let key = FileKey::new(filename.clone(), owner.clone());

        let locator = ctx
            .registry
            .lookup(key)
            .await
            .map_err(|e| CommandError::storage("File list unavailable.", e))?
            .ok_or(CommandError::NotFoundOrForbidden(messages::FILE_NOT_FOUND))?;

        let (mut source, size) = match ctx.storage.open(&locator).await {
            Ok(opened) => opened,
            Err(StorageError::NotFound(path)) => {
                warn!(locator = %locator, path = %path, "Registered file missing from storage");
                return Err(CommandError::NotFoundOrForbidden(
                    messages::FILE_MISSING_ON_SERVER,
                ));
            }
            Err(e) => {
                return Err(CommandError::storage(
                    format!("{filename} could not be read."),
                    e,
                ))
            }
        };

        io.writer
            .send_line(&ServerLine::Response(size.to_string()).to_string())
            .await?;

        // Past the size line a read failure cannot be reported in band.
        let mut chunk = vec![0u8; DATA_CHUNK_SIZE];
        let mut sent: u64 = 0;
        while sent < size {
            let n = source.read(&mut chunk).await.map_err(|e| {
                warn!(locator = %locator, error = %e, "Storage read failed mid-download");
                ChannelError::Io(e)
            })?;
            if n == 0 {
                break;
            }
            io.writer
                .send_data_frame(chunk.get(..n).unwrap_or_default())
                .await?;
            sent += n as u64;
        }
        if sent != size {
            warn!(locator = %locator, expected = size, sent, "File changed size during download");
            return Err(ChannelError::ConnectionLost.into());
        }
        io.writer.send_data_frame(&[]).await?;

        info!(name = %who, filename = %filename, owner = %owner, size, "File downloaded");
        ctx.events.emit(EventKind::Downloaded {
            filename: filename.clone(),
            owner: owner.clone(),
            by: who.clone(),
            size,
        });

        if owner != *who {
            // Detached: a stalled owner must not hold up the downloader.
            let notice = ServerLine::download_notice(&filename, who);
            let shared = Arc::clone(ctx);
            tokio::spawn(async move {
                let delivered = shared.directory.notify(&owner, &notice).await;
                shared.events.emit(EventKind::Notified {
                    recipient: owner,
                    delivered,
                });
            });
        }
        Ok(())
    }

    // ========================================================================
    // DELETE
    // ========================================================================

    async fn delete(
        &self,
        who: &DisplayName,
        io: &mut SessionIo,
        filename: FileName,
    ) -> Result<(), CommandError> {
        let ctx = &self.ctx;
        let key = FileKey::new(filename.clone(), who.clone());

        let locator = ctx
            .registry
            .remove(key)
            .await
            .map_err(|e| CommandError::storage(format!("{filename} could not be deleted."), e))?
            .ok_or(CommandError::NotFoundOrForbidden(
                messages::NOT_OWNED_OR_MISSING,
            ))?;

        match ctx.storage.remove(&locator).await {
            Ok(true) => {}
            Ok(false) => debug!(locator = %locator, "Deleted record had no stored artifact"),
            Err(e) => warn!(locator = %locator, error = %e, "Failed to remove artifact"),
        }

        io.writer
            .send_line(&ServerLine::deleted(&filename).to_string())
            .await?;

        info!(name = %who, filename = %filename, "File deleted");
        ctx.events.emit(EventKind::Deleted {
            filename,
            owner: who.clone(),
        });
        Ok(())
    }
}
