//! Integration tests for the TCP server.
//!
//! These tests run a real `FileServer` on a loopback port with a temporary
//! data directory and drive it with raw protocol clients.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.
//! We test the panic-free behavior of production code through assertions.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fshared::directory::SessionDirectory;
use fshared::events::{EventKind, ServerEvent};
use fshared::registry::RegistryHandle;
use fshared::{FileServer, ServerConfig};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Upper bound on any single wait in these tests
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between condition checks
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long to wait before concluding that nothing arrives
const QUIET_PERIOD: Duration = Duration::from_millis(200);

// ============================================================================
// Test Helpers
// ============================================================================

/// Test server context that manages server lifecycle and cleanup.
struct TestServer {
    addr: SocketAddr,
    data_dir: PathBuf,
    registry: RegistryHandle,
    directory: SessionDirectory,
    events: broadcast::Receiver<ServerEvent>,
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

impl TestServer {
    /// Spawns a server on a fresh data directory.
    async fn spawn(temp_dir: &TempDir) -> Self {
        Self::spawn_with(temp_dir.path(), |_| {}).await
    }

    /// Spawns a server on `data_dir` after letting `tweak` adjust the config.
    async fn spawn_with(data_dir: &Path, tweak: impl FnOnce(&mut ServerConfig)) -> Self {
        let mut config = ServerConfig {
            bind: "127.0.0.1".parse().unwrap(),
            port: 0,
            data_dir: data_dir.to_path_buf(),
            ..ServerConfig::default()
        };
        tweak(&mut config);

        let cancel_token = CancellationToken::new();
        let server = FileServer::bind(&config, cancel_token.clone())
            .await
            .expect("bind server");
        let addr = server.local_addr().unwrap();
        let registry = server.registry().clone();
        let directory = server.directory().clone();
        let events = server.subscribe();

        let task = tokio::spawn(async move {
            let _ = server.run().await;
        });

        TestServer {
            addr,
            data_dir: data_dir.to_path_buf(),
            registry,
            directory,
            events,
            cancel_token,
            task,
        }
    }

    /// Opens a connection without performing the handshake.
    async fn connect_raw(&self) -> TestClient {
        let stream = TcpStream::connect(self.addr).await.expect("connect to server");
        TestClient::new(stream)
    }

    /// Opens a connection and claims `name`.
    async fn connect(&self, name: &str) -> TestClient {
        let mut client = self.connect_raw().await;
        client.send_line(name).await;
        assert_eq!(client.recv_line().await, "OK");
        client
    }

    /// Waits until `n` sessions are registered.
    async fn wait_for_sessions(&self, n: usize) {
        let start = tokio::time::Instant::now();
        while self.directory.len().await != n {
            assert!(start.elapsed() < WAIT_TIMEOUT, "expected {n} sessions");
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Waits for the first event matching `pred`.
    async fn wait_for_event(&mut self, pred: impl Fn(&EventKind) -> bool) -> EventKind {
        timeout(WAIT_TIMEOUT, async {
            loop {
                let event = self.events.recv().await.expect("event stream open");
                if pred(&event.kind) {
                    return event.kind;
                }
            }
        })
        .await
        .expect("event did not arrive")
    }

    /// Shuts down the server and waits for it to finish.
    async fn shutdown(self) {
        self.cancel_token.cancel();
        timeout(WAIT_TIMEOUT, self.task)
            .await
            .expect("server stopped")
            .unwrap();
    }
}

/// Raw protocol client.
struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn send_line(&mut self, line: &str) {
        self.send_raw(format!("{line}\n").as_bytes()).await;
    }

    /// Receives one line; an empty string means the server closed.
    async fn recv_line(&mut self) -> String {
        let mut line = String::new();
        timeout(WAIT_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("line did not arrive")
            .unwrap();
        line.trim_end_matches('\n').to_string()
    }

    /// Returns a line if one arrives within the quiet period.
    async fn try_recv_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match timeout(QUIET_PERIOD, self.reader.read_line(&mut line)).await {
            Ok(Ok(n)) if n > 0 => Some(line.trim_end_matches('\n').to_string()),
            _ => None,
        }
    }

    async fn upload(&mut self, filename: &str, contents: &[u8]) -> String {
        let mut frame = format!("UPLOAD {filename} {}\n", contents.len()).into_bytes();
        frame.extend_from_slice(contents);
        self.send_raw(&frame).await;
        self.recv_line().await
    }

    async fn list(&mut self) -> Vec<String> {
        self.send_line("LIST").await;
        let header = self.recv_line().await;
        let count: usize = header
            .strip_prefix("RESPONSE:")
            .expect("LIST header")
            .parse()
            .unwrap();
        let mut entries = Vec::new();
        for _ in 0..count {
            let line = self.recv_line().await;
            entries.push(line.strip_prefix("RESPONSE:").unwrap().to_string());
        }
        entries
    }

    /// Downloads a file, returning its bytes or the error line.
    async fn download(&mut self, filename: &str, owner: &str) -> Result<Vec<u8>, String> {
        self.send_line(&format!("DOWNLOAD {filename} {owner}")).await;
        let first = self.recv_line().await;
        let Some(size) = first.strip_prefix("RESPONSE:") else {
            return Err(first);
        };
        let size: usize = size.parse().unwrap();

        let mut contents = Vec::with_capacity(size);
        loop {
            let header = self.recv_line().await;
            let n: usize = header
                .strip_prefix("DATA:")
                .unwrap_or_else(|| panic!("expected DATA frame, got {header:?}"))
                .parse()
                .unwrap();
            if n == 0 {
                break;
            }
            let mut chunk = vec![0u8; n];
            self.reader.read_exact(&mut chunk).await.unwrap();
            contents.extend_from_slice(&chunk);
        }
        assert_eq!(contents.len(), size);
        Ok(contents)
    }
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn dir_is_empty(path: &Path) -> bool {
    std::fs::read_dir(path).map(|mut d| d.next().is_none()).unwrap_or(true)
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_handshake_and_empty_list() {
    let temp = tempfile::tempdir().unwrap();
    let server = TestServer::spawn(&temp).await;

    let mut client = server.connect("alice").await;
    assert!(client.list().await.is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn test_invalid_username_is_rejected_and_closed() {
    let temp = tempfile::tempdir().unwrap();
    let server = TestServer::spawn(&temp).await;

    let mut client = server.connect_raw().await;
    client.send_line("../etc").await;
    let reply = client.recv_line().await;
    assert!(reply.starts_with("ERROR Invalid username: "), "{reply}");
    assert_eq!(client.recv_line().await, "");
    assert_eq!(server.directory.len().await, 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_name_single_winner() {
    let temp = tempfile::tempdir().unwrap();
    let server = TestServer::spawn(&temp).await;

    let mut first = server.connect_raw().await;
    let mut second = server.connect_raw().await;
    first.send_line("carol").await;
    second.send_line("carol").await;

    let replies = [first.recv_line().await, second.recv_line().await];
    assert_eq!(replies.iter().filter(|r| *r == "OK").count(), 1);
    assert_eq!(
        replies
            .iter()
            .filter(|r| *r == "ERROR Username already in use.")
            .count(),
        1
    );
    assert_eq!(server.directory.len().await, 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_name_is_released_on_disconnect() {
    let temp = tempfile::tempdir().unwrap();
    let server = TestServer::spawn(&temp).await;

    let client = server.connect("dave").await;
    drop(client);
    server.wait_for_sessions(0).await;

    let _again = server.connect("dave").await;
    server.shutdown().await;
}

// ============================================================================
// Transfers
// ============================================================================

#[tokio::test]
async fn test_upload_then_download_is_identical() {
    let temp = tempfile::tempdir().unwrap();
    let server = TestServer::spawn(&temp).await;
    let contents = payload(200 * 1024 + 17);

    let mut alice = server.connect("alice").await;
    assert_eq!(
        alice.upload("big.bin", &contents).await,
        "RESPONSE:big.bin uploaded successfully."
    );
    assert_eq!(alice.list().await, ["big.bin (Owner: alice)"]);
    assert_eq!(alice.download("big.bin", "alice").await.unwrap(), contents);

    server.shutdown().await;
}

#[tokio::test]
async fn test_empty_upload_and_download() {
    let temp = tempfile::tempdir().unwrap();
    let server = TestServer::spawn(&temp).await;

    let mut alice = server.connect("alice").await;
    assert_eq!(
        alice.upload("empty", b"").await,
        "RESPONSE:empty uploaded successfully."
    );
    assert_eq!(alice.download("empty", "alice").await.unwrap(), b"");

    server.shutdown().await;
}

#[tokio::test]
async fn test_reupload_overwrites() {
    let temp = tempfile::tempdir().unwrap();
    let server = TestServer::spawn(&temp).await;

    let mut alice = server.connect("alice").await;
    alice.upload("a.txt", b"first").await;
    alice.upload("a.txt", b"second version").await;

    assert_eq!(alice.list().await.len(), 1);
    assert_eq!(alice.download("a.txt", "alice").await.unwrap(), b"second version");

    server.shutdown().await;
}

#[tokio::test]
async fn test_same_filename_different_owners() {
    let temp = tempfile::tempdir().unwrap();
    let server = TestServer::spawn(&temp).await;

    let mut alice = server.connect("alice").await;
    let mut bob = server.connect("bob").await;
    alice.upload("notes.md", b"from alice").await;
    bob.upload("notes.md", b"from bob").await;

    assert_eq!(
        alice.list().await,
        ["notes.md (Owner: alice)", "notes.md (Owner: bob)"]
    );
    assert_eq!(alice.download("notes.md", "bob").await.unwrap(), b"from bob");

    server.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_uploads_from_many_sessions() {
    let temp = tempfile::tempdir().unwrap();
    let server = TestServer::spawn(&temp).await;
    const SESSIONS: usize = 8;

    let mut tasks = Vec::new();
    for i in 0..SESSIONS {
        let mut client = server.connect(&format!("user{i}")).await;
        tasks.push(tokio::spawn(async move {
            let reply = client.upload(&format!("file{i}.bin"), &payload(10_000 + i)).await;
            assert_eq!(reply, format!("RESPONSE:file{i}.bin uploaded successfully."));
            client
        }));
    }
    let mut clients = Vec::new();
    for task in tasks {
        clients.push(task.await.unwrap());
    }

    assert_eq!(clients[0].list().await.len(), SESSIONS);
    assert_eq!(server.registry.len().await, SESSIONS);

    server.shutdown().await;
}

#[tokio::test]
async fn test_download_missing_key() {
    let temp = tempfile::tempdir().unwrap();
    let server = TestServer::spawn(&temp).await;

    let mut bob = server.connect("bob").await;
    assert_eq!(
        bob.download("nothing.txt", "alice").await.unwrap_err(),
        "ERROR File not found."
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_download_missing_artifact() {
    let temp = tempfile::tempdir().unwrap();
    let server = TestServer::spawn(&temp).await;

    let mut alice = server.connect("alice").await;
    alice.upload("gone.txt", b"soon gone").await;
    std::fs::remove_file(server.data_dir.join("files/alice/gone.txt")).unwrap();

    assert_eq!(
        alice.download("gone.txt", "alice").await.unwrap_err(),
        "ERROR File not found on server."
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_interrupted_upload_leaves_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let server = TestServer::spawn(&temp).await;

    let mut alice = server.connect("alice").await;
    alice.send_raw(b"UPLOAD partial.bin 1000\n").await;
    alice.send_raw(&payload(100)).await;
    drop(alice);

    server.wait_for_sessions(0).await;
    assert_eq!(server.registry.len().await, 0);
    assert!(dir_is_empty(&server.data_dir.join("incoming")));
    assert!(!server.data_dir.join("files/alice/partial.bin").exists());

    server.shutdown().await;
}

#[tokio::test]
async fn test_oversized_upload_is_drained_and_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let server = TestServer::spawn_with(temp.path(), |c| c.max_upload_bytes = 16).await;

    let mut alice = server.connect("alice").await;
    let reply = alice.upload("big.bin", &payload(64)).await;
    assert_eq!(reply, "ERROR big.bin is too large (max: 16 bytes).");
    assert!(alice.list().await.is_empty());

    server.shutdown().await;
}

// ============================================================================
// Delete
// ============================================================================

#[tokio::test]
async fn test_delete_requires_ownership() {
    let temp = tempfile::tempdir().unwrap();
    let server = TestServer::spawn(&temp).await;

    let mut alice = server.connect("alice").await;
    let mut bob = server.connect("bob").await;
    alice.upload("mine.txt", b"private").await;

    bob.send_line("DELETE mine.txt").await;
    assert_eq!(
        bob.recv_line().await,
        "ERROR You do not own this file or it does not exist."
    );
    bob.send_line("DELETE never-existed").await;
    assert_eq!(
        bob.recv_line().await,
        "ERROR You do not own this file or it does not exist."
    );
    assert_eq!(server.registry.len().await, 1);

    alice.send_line("DELETE mine.txt").await;
    assert_eq!(alice.recv_line().await, "RESPONSE:mine.txt deleted successfully.");
    assert_eq!(server.registry.len().await, 0);
    assert!(!server.data_dir.join("files/alice/mine.txt").exists());

    server.shutdown().await;
}

// ============================================================================
// Notifications
// ============================================================================

#[tokio::test]
async fn test_download_notifies_connected_owner_once() {
    let temp = tempfile::tempdir().unwrap();
    let server = TestServer::spawn(&temp).await;

    let mut alice = server.connect("alice").await;
    let mut bob = server.connect("bob").await;
    alice.upload("song.mp3", b"la la la").await;

    assert_eq!(bob.download("song.mp3", "alice").await.unwrap(), b"la la la");

    assert_eq!(
        alice.recv_line().await,
        "NOTIFICATION: Your file 'song.mp3' was downloaded by bob."
    );
    assert_eq!(alice.try_recv_line().await, None);
    // The downloader gets nothing extra
    assert_eq!(bob.try_recv_line().await, None);

    server.shutdown().await;
}

#[tokio::test]
async fn test_own_download_does_not_notify() {
    let temp = tempfile::tempdir().unwrap();
    let server = TestServer::spawn(&temp).await;

    let mut alice = server.connect("alice").await;
    alice.upload("self.txt", b"me").await;
    alice.download("self.txt", "alice").await.unwrap();

    assert_eq!(alice.try_recv_line().await, None);

    server.shutdown().await;
}

#[tokio::test]
async fn test_download_after_owner_left_notifies_nobody() {
    let temp = tempfile::tempdir().unwrap();
    let mut server = TestServer::spawn(&temp).await;

    let mut alice = server.connect("alice").await;
    alice.upload("song.mp3", b"la la la").await;
    alice.send_line("EXIT").await;
    assert_eq!(alice.recv_line().await, "");

    let mut bob = server.connect("bob").await;
    server.wait_for_sessions(1).await;
    assert_eq!(bob.download("song.mp3", "alice").await.unwrap(), b"la la la");

    let event = server
        .wait_for_event(|kind| matches!(kind, EventKind::Notified { .. }))
        .await;
    assert!(matches!(event, EventKind::Notified { delivered: false, .. }));

    server.shutdown().await;
}

// ============================================================================
// Command handling
// ============================================================================

#[tokio::test]
async fn test_bad_commands_keep_session_alive() {
    let temp = tempfile::tempdir().unwrap();
    let server = TestServer::spawn(&temp).await;

    let mut alice = server.connect("alice").await;

    alice.send_line("FROBNICATE").await;
    assert_eq!(alice.recv_line().await, "ERROR Unknown command.");

    alice.send_line("UPLOADX a 1").await;
    assert_eq!(alice.recv_line().await, "ERROR Unknown command.");

    alice.send_line("DOWNLOAD onlyname").await;
    assert_eq!(alice.recv_line().await, "ERROR Invalid DOWNLOAD command.");

    alice.send_line("UPLOAD a.txt lots").await;
    assert!(alice.recv_line().await.starts_with("ERROR Invalid UPLOAD command"));

    alice.send_raw(b"\n\n").await;
    assert!(alice.list().await.is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn test_invalid_upload_name_payload_is_skipped() {
    let temp = tempfile::tempdir().unwrap();
    let server = TestServer::spawn(&temp).await;

    let mut alice = server.connect("alice").await;
    alice.send_raw(b"UPLOAD ../escape 5\nLIST\n").await;
    let reply = alice.recv_line().await;
    assert!(reply.starts_with("ERROR Invalid UPLOAD command: "), "{reply}");
    // "LIST\n" was the payload, so nothing else is pending
    assert_eq!(alice.try_recv_line().await, None);
    assert!(alice.list().await.is_empty());
    assert!(!temp.path().join("escape").exists());

    server.shutdown().await;
}

#[tokio::test]
async fn test_exit_closes_connection() {
    let temp = tempfile::tempdir().unwrap();
    let server = TestServer::spawn(&temp).await;

    let mut alice = server.connect("alice").await;
    alice.send_line("EXIT").await;
    assert_eq!(alice.recv_line().await, "");
    server.wait_for_sessions(0).await;

    server.shutdown().await;
}

// ============================================================================
// Persistence and lifecycle
// ============================================================================

#[tokio::test]
async fn test_registry_survives_restart() {
    let temp = tempfile::tempdir().unwrap();

    let server = TestServer::spawn(&temp).await;
    let mut alice = server.connect("alice").await;
    alice.upload("keep.txt", b"persistent").await;
    alice.upload("drop.txt", b"temporary").await;
    alice.send_line("DELETE drop.txt").await;
    alice.recv_line().await;
    drop(alice);
    server.shutdown().await;

    // A corrupt line in the log is skipped on reload
    let log_path = temp.path().join("file_owner_map.txt");
    let mut log = std::fs::read_to_string(&log_path).unwrap();
    log.push_str("this is not a record\n");
    std::fs::write(&log_path, log).unwrap();

    let server = TestServer::spawn(&temp).await;
    let mut bob = server.connect("bob").await;
    assert_eq!(bob.list().await, ["keep.txt (Owner: alice)"]);
    assert_eq!(bob.download("keep.txt", "alice").await.unwrap(), b"persistent");

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_idle_sessions() {
    let temp = tempfile::tempdir().unwrap();
    let server = TestServer::spawn(&temp).await;

    let mut alice = server.connect("alice").await;
    server.shutdown().await;

    assert_eq!(alice.recv_line().await, "");
}

#[tokio::test]
async fn test_events_describe_activity() {
    let temp = tempfile::tempdir().unwrap();
    let mut server = TestServer::spawn(&temp).await;

    let listening = server
        .wait_for_event(|kind| matches!(kind, EventKind::Listening { .. }))
        .await;
    assert!(matches!(listening, EventKind::Listening { addr } if addr == server.addr));

    let mut alice = server.connect("alice").await;
    alice.upload("a.txt", b"abc").await;

    let uploaded = server
        .wait_for_event(|kind| matches!(kind, EventKind::Uploaded { .. }))
        .await;
    assert!(matches!(uploaded, EventKind::Uploaded { size: 3, .. }));

    drop(alice);
    server
        .wait_for_event(|kind| matches!(kind, EventKind::Disconnected { .. }))
        .await;

    server.shutdown().await;
}
