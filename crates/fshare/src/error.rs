//! Error types for the fshare client.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::io;

use fshare_core::DomainError;
use fshare_protocol::ChannelError;
use thiserror::Error;

// ============================================================================
// Client Error Type
// ============================================================================

/// Errors returned by [`crate::Client`] operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Could not open the TCP connection.
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The server refused the handshake (bad or taken name).
    #[error("Server rejected connection: {0}")]
    Rejected(String),

    /// The server answered a request with an `ERROR` line.
    ///
    /// The session is still usable.
    #[error("{0}")]
    Server(String),

    /// The connection closed while a reply was pending.
    #[error("Connection to server lost")]
    ConnectionLost,

    /// The server sent something that does not fit the request.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A name given to the client failed validation.
    #[error("Invalid name: {0}")]
    InvalidName(#[from] DomainError),

    /// Transport failure while sending.
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// A local read failed after an upload's size was announced.
    ///
    /// The server is still owed payload bytes, so the connection is closed.
    #[error("Transfer of {filename} aborted: {source}")]
    TransferAborted {
        filename: String,
        #[source]
        source: io::Error,
    },

    /// Local file I/O failure outside a transfer's payload.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ClientError {
    /// Whether the connection is unusable after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ClientError::Server(_) | ClientError::InvalidName(_) | ClientError::Io(_)
        )
    }
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Convenience Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

// ============================================================================
// Tests
// ============================================================================
