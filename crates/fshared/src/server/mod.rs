//! TCP server for the fshare daemon.
//!
//! The server:
//! - Listens on a TCP socket for client connections
//! - Spawns a Session for each client
//! - Publishes activity as `ServerEvent`s
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   FileServer    │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │     Session     │────▶│   Dispatcher    │
//! │  (per client)   │     └───────┬─────────┘
//! └─────────────────┘             │
//!                   ┌─────────────┼──────────────┐
//!                   ▼             ▼              ▼
//!           RegistryHandle  SessionDirectory  Storage
//!                                 │
//!                                 │ NOTIFICATION
//!                                 ▼
//!                         other sessions' writers
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Accept errors are logged and allow continued operation

mod dispatch;
mod session;

pub use dispatch::{CommandError, Dispatcher, Flow};
pub use session::{Session, SessionError, SessionIo};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fshare_protocol::{ChannelConfig, FramedChannel};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::directory::SessionDirectory;
use crate::events::{EventBus, EventKind, ServerEvent};
use crate::registry::{spawn_registry, RegistryError, RegistryHandle, RegistryLog};
use crate::storage::{FsStorage, Storage, StorageError};

/// Per-session limits.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Largest accepted upload
    pub max_upload_bytes: u64,
    /// Deadlines and line limit for each session's channel
    pub channel: ChannelConfig,
}

impl Limits {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            max_upload_bytes: config.max_upload_bytes,
            channel: config.channel_config(),
        }
    }
}

/// State shared by every session.
pub struct ServerContext {
    pub registry: RegistryHandle,
    pub directory: SessionDirectory,
    pub storage: Arc<dyn Storage>,
    pub events: EventBus,
    pub limits: Limits,
}

/// The file-sharing server.
pub struct FileServer {
    /// Bound listener
    listener: TcpListener,

    /// Shared state handed to each session
    ctx: Arc<ServerContext>,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for generating session ids
    connection_counter: AtomicU64,
}

impl FileServer {
    /// Opens storage, loads the registry and binds the listener.
    ///
    /// Nothing is accepted until [`FileServer::run`] is called.
    pub async fn bind(
        config: &ServerConfig,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let storage = FsStorage::with_dirs(config.files_dir(), config.incoming_dir()).await?;
        let registry = spawn_registry(RegistryLog::new(config.registry_log_path())).await?;

        let addr = config.socket_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr,
                error: e.to_string(),
            })?;

        let ctx = ServerContext {
            registry,
            directory: SessionDirectory::new(),
            storage: Arc::new(storage),
            events: EventBus::new(),
            limits: Limits::from_config(config),
        };
        Ok(Self::from_parts(listener, ctx, cancel_token))
    }

    /// Builds a server from an already bound listener and prepared context.
    pub fn from_parts(
        listener: TcpListener,
        ctx: ServerContext,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            listener,
            ctx: Arc::new(ctx),
            cancel_token,
            connection_counter: AtomicU64::new(0),
        }
    }

    /// Returns the bound address (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(|e| ServerError::Bind {
            addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            error: e.to_string(),
        })
    }

    /// Subscribes to server activity events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.ctx.events.subscribe()
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.ctx.registry
    }

    pub fn directory(&self) -> &SessionDirectory {
        &self.ctx.directory
    }

    /// Runs the server.
    ///
    /// Accepts connections until the cancellation token is triggered, then
    /// waits for the open sessions to wind down.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.local_addr()?;
        info!(addr = %addr, "Server listening");
        self.ctx.events.emit(EventKind::Listening { addr });

        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let id = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            sessions.spawn(self.session_for(stream, peer, id).run());
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            // Continue accepting other connections
                        }
                    }
                }

                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Session task failed");
                    }
                }
            }
        }

        drop(self.listener);
        let open = sessions.len();
        if open > 0 {
            debug!(open, "Waiting for sessions to close");
        }
        while sessions.join_next().await.is_some() {}

        info!("Server stopped");
        self.ctx.events.emit(EventKind::Stopped);
        Ok(())
    }

    fn session_for(&self, stream: TcpStream, peer: SocketAddr, id: u64) -> Session {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }
        let channel = FramedChannel::from_tcp(stream, self.ctx.limits.channel);
        Session::new(
            id,
            peer,
            channel,
            Arc::clone(&self.ctx),
            self.cancel_token.child_token(),
        )
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },

    #[error("Storage setup failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Registry setup failed: {0}")]
    Registry(#[from] RegistryError),
}
