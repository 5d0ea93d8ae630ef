//! Session directory: live sessions keyed by display name.
//!
//! The directory enforces name uniqueness at handshake time and routes
//! notifications from one session to another session's writer. Entries are
//! removed only by the owning session's teardown, which passes its session
//! id so a late teardown can never evict a newer session holding the same
//! name.

use std::collections::HashMap;
use std::sync::Arc;

use fshare_core::DisplayName;
use fshare_protocol::{FrameWriter, ServerLine};
use tokio::sync::RwLock;
use tracing::debug;

/// What the directory knows about a live session.
pub struct SessionHandle {
    /// Connection-unique id
    pub id: u64,
    /// Claimed display name
    pub name: DisplayName,
    /// Shared write half of the session's channel
    pub writer: Arc<FrameWriter>,
}

impl SessionHandle {
    pub fn new(id: u64, name: DisplayName, writer: Arc<FrameWriter>) -> Self {
        Self { id, name, writer }
    }
}

type SessionsMap = Arc<RwLock<HashMap<DisplayName, Arc<SessionHandle>>>>;

/// Process-wide map of display name to live session.
///
/// Cheap to clone; all clones share the same map.
#[derive(Clone, Default)]
pub struct SessionDirectory {
    sessions: SessionsMap,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handle` under its name unless the name is taken.
    ///
    /// The check and the insert happen under one write lock, so of two
    /// concurrent handshakes with the same name exactly one succeeds.
    pub async fn try_register(&self, handle: SessionHandle) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&handle.name) {
            return false;
        }
        debug!(name = %handle.name, session = handle.id, "Session registered");
        sessions.insert(handle.name.clone(), Arc::new(handle));
        true
    }

    /// Removes the entry for `name` if it belongs to session `id`.
    pub async fn unregister(&self, name: &DisplayName, id: u64) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(name) {
            Some(existing) if existing.id == id => {
                sessions.remove(name);
                debug!(name = %name, session = id, "Session unregistered");
                true
            }
            _ => false,
        }
    }

    /// Returns the live session for `name`.
    ///
    /// A session whose writer is already closed counts as absent.
    pub async fn lookup(&self, name: &DisplayName) -> Option<Arc<SessionHandle>> {
        let handle = self.sessions.read().await.get(name).cloned()?;
        if handle.writer.is_closed().await {
            return None;
        }
        Some(handle)
    }

    /// Sends `line` to the session named `name`.
    ///
    /// Returns whether the line was written. Failures are logged and
    /// otherwise ignored; a failed write closes the target's writer, so
    /// later notifications skip it.
    pub async fn notify(&self, name: &DisplayName, line: &ServerLine) -> bool {
        let Some(handle) = self.lookup(name).await else {
            debug!(name = %name, "Notification target not connected");
            return false;
        };
        match handle.writer.send_line(&line.to_string()).await {
            Ok(()) => true,
            Err(e) => {
                debug!(name = %name, error = %e, "Notification delivery failed");
                false
            }
        }
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Names of live sessions, sorted.
    pub async fn names(&self) -> Vec<DisplayName> {
        let mut names: Vec<DisplayName> = self.sessions.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use fshare_protocol::{ChannelConfig, FramedChannel};
    use tokio::io::duplex;
    use tokio::time::timeout;

    fn name(raw: &str) -> DisplayName {
        DisplayName::new(raw).unwrap()
    }

    fn session(id: u64, raw: &str) -> (SessionHandle, FramedChannel) {
        let (ours, theirs) = duplex(4096);
        let ours = FramedChannel::from_stream(ours, ChannelConfig::default());
        let peer = FramedChannel::from_stream(theirs, ChannelConfig::default());
        (SessionHandle::new(id, name(raw), ours.writer_handle()), peer)
    }

    #[tokio::test]
    async fn test_register_rejects_duplicate_name() {
        let directory = SessionDirectory::new();
        let (first, _p1) = session(1, "alice");
        let (second, _p2) = session(2, "alice");

        assert!(directory.try_register(first).await);
        assert!(!directory.try_register(second).await);
        assert_eq!(directory.len().await, 1);
        assert_eq!(directory.lookup(&name("alice")).await.unwrap().id, 1);
    }

    #[tokio::test]
    async fn test_concurrent_register_single_winner() {
        let directory = SessionDirectory::new();
        let mut tasks = Vec::new();
        let mut peers = Vec::new();
        for id in 0..16 {
            let (handle, peer) = session(id, "bob");
            peers.push(peer);
            let directory = directory.clone();
            tasks.push(tokio::spawn(async move { directory.try_register(handle).await }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_unregister_requires_matching_id() {
        let directory = SessionDirectory::new();
        let (handle, _peer) = session(7, "carol");
        directory.try_register(handle).await;

        assert!(!directory.unregister(&name("carol"), 8).await);
        assert_eq!(directory.len().await, 1);
        assert!(directory.unregister(&name("carol"), 7).await);
        assert!(directory.is_empty().await);
    }

    #[tokio::test]
    async fn test_notify_delivers_line() {
        let directory = SessionDirectory::new();
        let (handle, mut peer) = session(1, "dave");
        directory.try_register(handle).await;

        let line = ServerLine::Notification("hello".to_string());
        assert!(directory.notify(&name("dave"), &line).await);
        assert_eq!(peer.recv_line().await.unwrap(), "NOTIFICATION: hello");
    }

    #[tokio::test]
    async fn test_notify_absent_or_closed_is_swallowed() {
        let directory = SessionDirectory::new();
        let line = ServerLine::Notification("hello".to_string());
        assert!(!directory.notify(&name("nobody"), &line).await);

        let (handle, _peer) = session(1, "erin");
        let writer = Arc::clone(&handle.writer);
        directory.try_register(handle).await;
        writer.close().await;

        assert!(directory.lookup(&name("erin")).await.is_none());
        assert!(!directory.notify(&name("erin"), &line).await);
    }

    #[tokio::test]
    async fn test_notify_stalled_session_times_out_once() {
        let directory = SessionDirectory::new();
        let (ours, _stalled) = duplex(64);
        let config = ChannelConfig {
            write_timeout: Some(Duration::from_millis(50)),
            ..ChannelConfig::default()
        };
        let channel = FramedChannel::from_stream(ours, config);
        directory
            .try_register(SessionHandle::new(1, name("frank"), channel.writer_handle()))
            .await;

        let line = ServerLine::Notification("x".repeat(200));
        let delivered = timeout(Duration::from_secs(2), directory.notify(&name("frank"), &line))
            .await
            .expect("notify should be bounded by the write timeout");
        assert!(!delivered);

        assert!(directory.lookup(&name("frank")).await.is_none());
        assert!(!directory.notify(&name("frank"), &line).await);
    }

    #[tokio::test]
    async fn test_names_sorted() {
        let directory = SessionDirectory::new();
        let mut peers = Vec::new();
        for (id, raw) in [(1, "zed"), (2, "amy"), (3, "kim")] {
            let (handle, peer) = session(id, raw);
            peers.push(peer);
            directory.try_register(handle).await;
        }
        let names: Vec<String> = directory.names().await.into_iter().map(String::from).collect();
        assert_eq!(names, ["amy", "kim", "zed"]);
    }
}
