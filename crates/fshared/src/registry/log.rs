//! Durable registry log.
//!
//! One record per line, `filename|owner|locator`. The whole file is
//! rewritten on every mutation: the new contents go to a sibling temporary
//! file which is fsynced and then renamed over the log, so a crash leaves
//! either the old or the new log, never a mix.
//!
//! Loading is tolerant: a line that does not split into three valid fields
//! is skipped and counted, and the rest of the log still loads.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use fshare_core::{DisplayName, FileKey, FileName, Locator};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::commands::RegistryError;

/// Field separator within a record.
const SEPARATOR: char = '|';

/// Registry contents, ordered by key.
pub type RegistryMap = BTreeMap<FileKey, Locator>;

/// Result of loading the log.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Records recovered from the log
    pub entries: RegistryMap,
    /// Number of non-empty lines that could not be parsed
    pub skipped: usize,
}

/// Handle to the registry log file.
#[derive(Debug, Clone)]
pub struct RegistryLog {
    path: PathBuf,
}

impl RegistryLog {
    /// Creates a handle for the log at `path`. Nothing is touched on disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the log path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("registry"));
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Loads the log. A missing file is an empty registry.
    pub async fn load(&self) -> Result<LoadReport, RegistryError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No registry log yet");
                return Ok(LoadReport::default());
            }
            Err(e) => return Err(RegistryError::Load(e.to_string())),
        };

        let mut report = LoadReport::default();
        for (index, raw) in bytes.split(|&b| b == b'\n').enumerate() {
            let Ok(line) = std::str::from_utf8(raw) else {
                warn!(line = index + 1, "Skipping non UTF-8 registry log line");
                report.skipped += 1;
                continue;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_record(line) {
                Some((key, locator)) => {
                    report.entries.insert(key, locator);
                }
                None => {
                    warn!(line = index + 1, content = %line, "Skipping malformed registry log line");
                    report.skipped += 1;
                }
            }
        }

        Ok(report)
    }

    /// Atomically replaces the log with `entries`.
    pub async fn save(&self, entries: &RegistryMap) -> Result<(), RegistryError> {
        let mut contents = String::new();
        for (key, locator) in entries {
            contents.push_str(&format_record(key, locator));
            contents.push('\n');
        }

        let temp = self.temp_path();
        self.write_and_sync(&temp, contents.as_bytes())
            .await
            .map_err(|e| RegistryError::Persist(e.to_string()))?;

        if let Err(e) = fs::rename(&temp, &self.path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(RegistryError::Persist(e.to_string()));
        }

        debug!(path = %self.path.display(), records = entries.len(), "Registry log written");
        Ok(())
    }

    async fn write_and_sync(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        Ok(())
    }
}

/// Renders one record.
pub fn format_record(key: &FileKey, locator: &Locator) -> String {
    format!("{}{SEPARATOR}{}{SEPARATOR}{}", key.filename, key.owner, locator)
}

/// Parses one record, validating every field.
pub fn parse_record(line: &str) -> Option<(FileKey, Locator)> {
    let mut fields = line.split(SEPARATOR);
    let filename = FileName::new(fields.next()?).ok()?;
    let owner = DisplayName::new(fields.next()?).ok()?;
    let locator = Locator::parse(fields.next()?).ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some((FileKey::new(filename, owner), locator))
}
