//! Registry actor - owns all file records and processes commands.
//!
//! The RegistryActor is the single owner of the (filename, owner) → locator
//! map. It receives commands via an mpsc channel, persists every mutation
//! before replying, and publishes events via broadcast.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel send failures are logged but don't panic

use fshare_core::{FileKey, Locator};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info};

use super::commands::{RegistryCommand, RegistryError, RegistryEvent};
use super::log::{RegistryLog, RegistryMap};

// ============================================================================
// Registry Actor
// ============================================================================

/// The registry actor - owns all file records.
///
/// Implements the actor pattern: receives commands via mpsc channel,
/// processes them sequentially, and publishes events to subscribers.
///
/// # Consistency
///
/// A mutation is applied in memory, then the log is rewritten. If the
/// rewrite fails the in-memory change is undone and the caller gets
/// `RegistryError::Persist`, so the log never lags behind a reply that
/// reported success.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// File records, ordered for stable snapshots
    entries: RegistryMap,

    /// Durable copy of `entries`
    log: RegistryLog,

    /// Event publisher for observers
    event_publisher: broadcast::Sender<RegistryEvent>,
}

impl RegistryActor {
    /// Creates a new registry actor.
    ///
    /// # Arguments
    ///
    /// * `receiver` - Channel for receiving commands
    /// * `entries` - Records recovered from the log
    /// * `log` - Log rewritten after every mutation
    /// * `event_publisher` - Broadcast channel for publishing events
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        entries: RegistryMap,
        log: RegistryLog,
        event_publisher: broadcast::Sender<RegistryEvent>,
    ) -> Self {
        Self {
            receiver,
            entries,
            log,
            event_publisher,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    /// This is the main entry point - call this in a spawned task.
    pub async fn run(mut self) {
        info!(records = self.entries.len(), "Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }

        info!(records = self.entries.len(), "Registry actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    async fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Lookup { key, respond_to } => {
                let result = self.entries.get(&key).cloned();
                // Ignore send error - client may have dropped the receiver
                let _ = respond_to.send(result);
            }
            RegistryCommand::Insert {
                key,
                locator,
                respond_to,
            } => {
                let result = self.handle_insert(key, locator).await;
                let _ = respond_to.send(result);
            }
            RegistryCommand::Remove { key, respond_to } => {
                let result = self.handle_remove(key).await;
                let _ = respond_to.send(result);
            }
            RegistryCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.entries.keys().cloned().collect());
            }
            RegistryCommand::Count { respond_to } => {
                let _ = respond_to.send(self.entries.len());
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    async fn handle_insert(
        &mut self,
        key: FileKey,
        locator: Locator,
    ) -> Result<Option<Locator>, RegistryError> {
        let previous = self.entries.insert(key.clone(), locator);

        if let Err(e) = self.log.save(&self.entries).await {
            match previous {
                Some(old) => {
                    self.entries.insert(key.clone(), old);
                }
                None => {
                    self.entries.remove(&key);
                }
            }
            error!(key = %key, error = %e, "Insert rolled back");
            return Err(e);
        }

        info!(
            key = %key,
            replaced = previous.is_some(),
            total_records = self.entries.len(),
            "File registered"
        );

        // Publish event (ignore if no subscribers)
        let _ = self.event_publisher.send(RegistryEvent::Inserted {
            key,
            replaced: previous.is_some(),
        });

        Ok(previous)
    }

    async fn handle_remove(&mut self, key: FileKey) -> Result<Option<Locator>, RegistryError> {
        let Some(locator) = self.entries.remove(&key) else {
            debug!(key = %key, "Remove of unknown key");
            return Ok(None);
        };

        if let Err(e) = self.log.save(&self.entries).await {
            self.entries.insert(key.clone(), locator);
            error!(key = %key, error = %e, "Remove rolled back");
            return Err(e);
        }

        info!(
            key = %key,
            total_records = self.entries.len(),
            "File unregistered"
        );

        let _ = self.event_publisher.send(RegistryEvent::Removed { key });

        Ok(Some(locator))
    }

    #[cfg(test)]
    pub fn record_count(&self) -> usize {
        self.entries.len()
    }
}
