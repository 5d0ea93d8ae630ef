//! Storage backend for uploaded file contents.
//!
//! The registry only records locators; the bytes live behind the [`Storage`]
//! trait. Uploads are written to a temporary artifact first and committed to
//! their locator only once the whole payload has arrived, so a locator never
//! names a partially written file.
//!
//! [`FsStorage`] keeps committed files under `<root>/files/<owner>/<filename>`
//! and temporaries under `<root>/incoming`, which is emptied on startup.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use fshare_core::Locator;
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// Writable end of a temporary artifact.
pub type ArtifactSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Readable committed artifact.
pub type ArtifactSource = Box<dyn AsyncRead + Send + Unpin>;

/// Extension given to temporary artifacts.
const TEMP_EXTENSION: &str = "part";

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Storage I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    fn io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound(path.display().to_string())
        } else {
            StorageError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Opaque name of an uncommitted upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempArtifact(String);

impl TempArtifact {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Where file contents are kept.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Creates an empty temporary artifact and returns a sink for its bytes.
    async fn create_temp(&self) -> Result<(TempArtifact, ArtifactSink), StorageError>;

    /// Durably moves a fully written temporary artifact to `locator`,
    /// replacing whatever was there.
    ///
    /// The sink returned by `create_temp` must have been flushed and dropped.
    async fn commit(&self, temp: &TempArtifact, locator: &Locator) -> Result<(), StorageError>;

    /// Deletes a temporary artifact. Missing artifacts are ignored.
    async fn discard(&self, temp: &TempArtifact);

    /// Opens a committed artifact and returns it with its size in bytes.
    async fn open(&self, locator: &Locator) -> Result<(ArtifactSource, u64), StorageError>;

    /// Deletes a committed artifact. Returns `false` if it did not exist.
    async fn remove(&self, locator: &Locator) -> Result<bool, StorageError>;

    /// Size in bytes of a committed artifact.
    async fn size(&self, locator: &Locator) -> Result<u64, StorageError>;

    /// Whether a committed artifact exists.
    async fn exists(&self, locator: &Locator) -> bool {
        self.size(locator).await.is_ok()
    }
}

// ============================================================================
// Filesystem Backend
// ============================================================================

/// Filesystem-backed storage.
#[derive(Debug)]
pub struct FsStorage {
    files_dir: PathBuf,
    incoming_dir: PathBuf,
    counter: AtomicU64,
}

impl FsStorage {
    /// Opens storage with the given directories, creating them if needed and
    /// deleting any temporaries left behind by a previous run.
    pub async fn with_dirs(
        files_dir: impl Into<PathBuf>,
        incoming_dir: impl Into<PathBuf>,
    ) -> Result<Self, StorageError> {
        let storage = Self {
            files_dir: files_dir.into(),
            incoming_dir: incoming_dir.into(),
            counter: AtomicU64::new(0),
        };

        fs::create_dir_all(&storage.files_dir)
            .await
            .map_err(|e| StorageError::io(&storage.files_dir, e))?;
        fs::create_dir_all(&storage.incoming_dir)
            .await
            .map_err(|e| StorageError::io(&storage.incoming_dir, e))?;

        let swept = storage.sweep_incoming().await?;
        if swept > 0 {
            info!(
                dir = %storage.incoming_dir.display(),
                swept,
                "Removed stale temporary uploads"
            );
        }

        Ok(storage)
    }

    /// Opens storage rooted at `root` (`files/` and `incoming/` below it).
    pub async fn open_root(root: &Path) -> Result<Self, StorageError> {
        Self::with_dirs(root.join("files"), root.join("incoming")).await
    }

    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    pub fn incoming_dir(&self) -> &Path {
        &self.incoming_dir
    }

    async fn sweep_incoming(&self) -> Result<usize, StorageError> {
        let mut entries = fs::read_dir(&self.incoming_dir)
            .await
            .map_err(|e| StorageError::io(&self.incoming_dir, e))?;

        let mut swept = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&self.incoming_dir, e))?
        {
            let path = entry.path();
            match fs::remove_file(&path).await {
                Ok(()) => swept += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove stale upload"),
            }
        }
        Ok(swept)
    }

    fn temp_path(&self, temp: &TempArtifact) -> PathBuf {
        self.incoming_dir.join(temp.as_str())
    }

    fn artifact_path(&self, locator: &Locator) -> PathBuf {
        locator
            .components()
            .fold(self.files_dir.clone(), |path, part| path.join(part))
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn create_temp(&self) -> Result<(TempArtifact, ArtifactSink), StorageError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let temp = TempArtifact(format!("{}-{n}.{TEMP_EXTENSION}", std::process::id()));
        let path = self.temp_path(&temp);

        let file = fs::File::create(&path)
            .await
            .map_err(|e| StorageError::io(&path, e))?;
        debug!(path = %path.display(), "Temporary artifact created");

        Ok((temp, Box::new(file)))
    }

    async fn commit(&self, temp: &TempArtifact, locator: &Locator) -> Result<(), StorageError> {
        let from = self.temp_path(temp);
        let to = self.artifact_path(locator);

        fs::File::open(&from)
            .await
            .map_err(|e| StorageError::io(&from, e))?
            .sync_all()
            .await
            .map_err(|e| StorageError::io(&from, e))?;

        // A concurrent `remove` may drop the owner directory between the
        // mkdir and the rename, so a missing parent gets one more attempt.
        let mut attempts = 0;
        loop {
            attempts += 1;
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StorageError::io(parent, e))?;
            }
            match fs::rename(&from, &to).await {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::NotFound && attempts < 2 => continue,
                Err(e) => return Err(StorageError::io(&to, e)),
            }
        }

        if let Some(parent) = to.parent() {
            if let Err(e) = sync_dir(parent).await {
                warn!(path = %parent.display(), error = %e, "Failed to sync artifact directory");
            }
        }

        debug!(locator = %locator, "Artifact committed");
        Ok(())
    }

    async fn discard(&self, temp: &TempArtifact) {
        let path = self.temp_path(temp);
        match fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "Temporary artifact discarded"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to discard temporary artifact"),
        }
    }

    async fn open(&self, locator: &Locator) -> Result<(ArtifactSource, u64), StorageError> {
        let path = self.artifact_path(locator);
        let file = fs::File::open(&path)
            .await
            .map_err(|e| StorageError::io(&path, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| StorageError::io(&path, e))?
            .len();
        Ok((Box::new(file), size))
    }

    async fn remove(&self, locator: &Locator) -> Result<bool, StorageError> {
        let path = self.artifact_path(locator);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(StorageError::io(&path, e)),
        }

        // Drop the owner directory once it is empty; failure just means it
        // still holds files.
        if let Some(parent) = path.parent() {
            if parent != self.files_dir.as_path() {
                let _ = fs::remove_dir(parent).await;
            }
        }
        Ok(true)
    }

    async fn size(&self, locator: &Locator) -> Result<u64, StorageError> {
        let path = self.artifact_path(locator);
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| StorageError::io(&path, e))?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(path.display().to_string()));
        }
        Ok(metadata.len())
    }
}

/// Makes a rename into `dir` durable.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
