//! File registry using the actor pattern.
//!
//! The registry maps (filename, owner) to the storage locator of the file's
//! bytes. It is the only path by which file records are created, looked up or
//! removed, and it keeps a durable log in step with every mutation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │    Sessions     │────▶│  RegistryActor  │────▶│ Broadcast Channel│
//! └─────────────────┘     └─────────────────┘     └──────────────────┘
//!         │                       │                        │
//!         │   RegistryCommand     │   rewrite on mutation  │ RegistryEvent
//!         │   (mpsc channel)      ▼                        ▼
//!         │               file_owner_map.txt         Observers
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

mod actor;
mod commands;
mod handle;
mod log;

pub use actor::RegistryActor;
pub use commands::{RegistryCommand, RegistryError, RegistryEvent};
pub use handle::RegistryHandle;
pub use log::{format_record, parse_record, LoadReport, RegistryLog, RegistryMap};

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 100;

/// Load the log, spawn the registry actor and return a handle to it.
///
/// Malformed log lines are skipped with a warning; the rest of the log
/// still loads.
///
/// # Errors
///
/// - `RegistryError::Load` if the log exists but cannot be read
///
/// # Example
///
/// ```no_run
/// use fshared::registry::{spawn_registry, RegistryLog};
///
/// #[tokio::main]
/// async fn main() {
///     let log = RegistryLog::new("/var/lib/fshare/file_owner_map.txt");
///     let handle = spawn_registry(log).await.unwrap();
///     let files = handle.snapshot().await.unwrap();
/// }
/// ```
pub async fn spawn_registry(log: RegistryLog) -> Result<RegistryHandle, RegistryError> {
    let report = log.load().await?;
    if report.skipped > 0 {
        warn!(
            path = %log.path().display(),
            skipped = report.skipped,
            "Registry log contained malformed lines"
        );
    }
    info!(
        path = %log.path().display(),
        records = report.entries.len(),
        "Registry loaded"
    );

    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = RegistryActor::new(cmd_rx, report.entries, log, event_tx.clone());
    tokio::spawn(actor.run());

    Ok(RegistryHandle::new(cmd_tx, event_tx))
}
