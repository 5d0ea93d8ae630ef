//! File identity and storage locators.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DomainError, DomainResult};
use crate::name::{DisplayName, FileName};

/// Registry key of a shared file: the logical name plus its owner.
///
/// Two users may share files with the same name; they are distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileKey {
    /// Logical file name chosen by the uploader
    pub filename: FileName,
    /// Identity of the uploader
    pub owner: DisplayName,
}

impl FileKey {
    /// Creates a new file key.
    pub fn new(filename: FileName, owner: DisplayName) -> Self {
        Self { filename, owner }
    }

    /// Returns the locator this key's bytes are stored under.
    pub fn locator(&self) -> Locator {
        Locator::for_key(self)
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Owner: {})", self.filename, self.owner)
    }
}

/// Opaque handle to a stored artifact, relative to the storage root.
///
/// Always `<owner>/<filename>`. Both components are validated names, so a
/// locator can neither escape the storage root nor collide with another
/// key's locator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locator(String);

impl Locator {
    /// Builds the locator for a file key.
    pub fn for_key(key: &FileKey) -> Self {
        Self(format!("{}/{}", key.owner, key.filename))
    }

    /// Parses a locator read back from persistent state.
    ///
    /// Rejects anything that is not two valid name components.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let (owner, filename) = raw
            .split_once('/')
            .ok_or_else(|| DomainError::MalformedLocator(raw.to_string()))?;
        DisplayName::new(owner)?;
        FileName::new(filename)?;
        Ok(Self(raw.to_string()))
    }

    /// Returns the locator as a relative path string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterates over the path components of the locator.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
