//! Registry actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `RegistryEvent`: Events published by the registry for observers

use fshare_core::{FileKey, Locator};
use thiserror::Error;
use tokio::sync::oneshot;

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each command carries a oneshot channel for the response. The actor
/// handles one command at a time, so every command is its own critical
/// section: mutations and snapshots never overlap.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Look up the locator of an exact key.
    Lookup {
        key: FileKey,
        respond_to: oneshot::Sender<Option<Locator>>,
    },

    /// Insert or overwrite a record, then persist the log.
    ///
    /// Responds with the replaced locator, if any. The response is only sent
    /// once the log rewrite has succeeded.
    ///
    /// # Errors
    /// - `RegistryError::Persist` if the log could not be written (the
    ///   in-memory change is rolled back)
    Insert {
        key: FileKey,
        locator: Locator,
        respond_to: oneshot::Sender<Result<Option<Locator>, RegistryError>>,
    },

    /// Remove a record, then persist the log.
    ///
    /// Responds with the removed locator, or `None` if the key was absent
    /// (in which case nothing is written).
    Remove {
        key: FileKey,
        respond_to: oneshot::Sender<Result<Option<Locator>, RegistryError>>,
    },

    /// All keys, sorted by (filename, owner).
    Snapshot {
        respond_to: oneshot::Sender<Vec<FileKey>>,
    },

    /// Number of records.
    Count {
        respond_to: oneshot::Sender<usize>,
    },
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,

    /// The registry log could not be read.
    #[error("failed to load registry log: {0}")]
    Load(String),

    /// The registry log could not be rewritten.
    #[error("failed to persist registry log: {0}")]
    Persist(String),
}

// ============================================================================
// Registry Events
// ============================================================================

/// Events published by the registry after a persisted mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A record was inserted (or an existing one overwritten).
    Inserted { key: FileKey, replaced: bool },

    /// A record was removed.
    Removed { key: FileKey },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::Persist("disk full".to_string());
        assert!(err.to_string().contains("disk full"));
        assert_eq!(RegistryError::ChannelClosed.to_string(), "response channel closed");
    }
}
