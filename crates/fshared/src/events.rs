//! Server activity events.
//!
//! A one-way, timestamped stream of what the server is doing, for a
//! presentation layer to render. Emitting never blocks and never fails; with
//! no subscribers events are simply dropped.

use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use fshare_core::{DisplayName, FileName};
use serde::Serialize;
use tokio::sync::broadcast;

/// Buffered events per subscriber before it starts lagging.
const EVENT_BUFFER: usize = 256;

/// A timestamped server event.
#[derive(Debug, Clone, Serialize)]
pub struct ServerEvent {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    Listening { addr: SocketAddr },
    Stopped,
    Connected { session: u64, name: DisplayName, peer: SocketAddr },
    Rejected { peer: SocketAddr, reason: String },
    Disconnected { session: u64, name: DisplayName },
    Uploaded { filename: FileName, owner: DisplayName, size: u64 },
    UploadFailed { filename: FileName, owner: DisplayName, reason: String },
    Listed { name: DisplayName, count: usize },
    Downloaded { filename: FileName, owner: DisplayName, by: DisplayName, size: u64 },
    Notified { recipient: DisplayName, delivered: bool },
    Deleted { filename: FileName, owner: DisplayName },
    CommandRejected { name: DisplayName, reason: String },
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Listening { addr } => write!(f, "Server listening on {addr}"),
            EventKind::Stopped => f.write_str("Server stopped"),
            EventKind::Connected { name, peer, .. } => write!(f, "{name} connected from {peer}"),
            EventKind::Rejected { peer, reason } => {
                write!(f, "Connection from {peer} rejected: {reason}")
            }
            EventKind::Disconnected { name, .. } => write!(f, "{name} disconnected"),
            EventKind::Uploaded {
                filename,
                owner,
                size,
            } => write!(f, "{owner} uploaded {filename} ({size} bytes)"),
            EventKind::UploadFailed {
                filename,
                owner,
                reason,
            } => write!(f, "Upload of {filename} by {owner} failed: {reason}"),
            EventKind::Listed { name, count } => write!(f, "{name} listed {count} files"),
            EventKind::Downloaded {
                filename,
                owner,
                by,
                ..
            } => write!(f, "{by} downloaded {filename} (Owner: {owner})"),
            EventKind::Notified {
                recipient,
                delivered: true,
            } => write!(f, "Notified {recipient}"),
            EventKind::Notified {
                recipient,
                delivered: false,
            } => write!(f, "Could not notify {recipient}"),
            EventKind::Deleted { filename, owner } => write!(f, "{owner} deleted {filename}"),
            EventKind::CommandRejected { name, reason } => {
                write!(f, "Rejected command from {name}: {reason}")
            }
        }
    }
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.at.format("%Y-%m-%d %H:%M:%S"), self.kind)
    }
}

/// Broadcast channel for [`ServerEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ServerEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER);
        Self { sender }
    }

    /// Stamps and publishes an event.
    pub fn emit(&self, kind: EventKind) {
        // No subscribers is not an error
        let _ = self.sender.send(ServerEvent {
            at: Utc::now(),
            kind,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }
}
