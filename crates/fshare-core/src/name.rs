//! Validated names used on the wire and as storage path components.
//!
//! Both display names and file names travel inside whitespace-split
//! command lines, are stored as `|`-separated log fields, and become
//! path components of a storage locator. One validation routine covers
//! all three uses.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{DomainError, DomainResult};

/// Maximum display name length in bytes.
pub const MAX_DISPLAY_NAME_LEN: usize = 64;

/// Maximum file name length in bytes (a common filesystem limit).
pub const MAX_FILE_NAME_LEN: usize = 255;

/// Field separator of the registry log; forbidden inside names.
const LOG_SEPARATOR: char = '|';

fn validate(field: &'static str, value: &str, max: usize) -> DomainResult<()> {
    if value.is_empty() {
        return Err(DomainError::Empty { field });
    }
    if value.len() > max {
        return Err(DomainError::TooLong {
            field,
            len: value.len(),
            max,
        });
    }
    if value == "." || value == ".." {
        return Err(DomainError::Reserved {
            field,
            value: value.to_string(),
        });
    }
    if let Some(found) = value
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || matches!(*c, LOG_SEPARATOR | '/' | '\\'))
    {
        return Err(DomainError::InvalidCharacter { field, found });
    }
    Ok(())
}

// ============================================================================
// Display Name
// ============================================================================

/// The identity a client claims during the handshake.
///
/// Unique among live sessions; owner component of every file key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DisplayName(String);

impl DisplayName {
    /// Validates and wraps a display name.
    pub fn new(name: impl Into<String>) -> DomainResult<Self> {
        let name = name.into();
        validate("username", &name, MAX_DISPLAY_NAME_LEN)?;
        Ok(Self(name))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DisplayName {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for DisplayName {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<DisplayName> for String {
    fn from(name: DisplayName) -> Self {
        name.0
    }
}

impl AsRef<str> for DisplayName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// File Name
// ============================================================================

/// Logical name of a shared file, as chosen by its uploader.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileName(String);

impl FileName {
    /// Validates and wraps a file name.
    pub fn new(name: impl Into<String>) -> DomainResult<Self> {
        let name = name.into();
        validate("filename", &name, MAX_FILE_NAME_LEN)?;
        Ok(Self(name))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FileName {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for FileName {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<FileName> for String {
    fn from(name: FileName) -> Self {
        name.0
    }
}

impl AsRef<str> for FileName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
