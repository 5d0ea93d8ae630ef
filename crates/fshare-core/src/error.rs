//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur when building domain values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Value is empty
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    /// Value exceeds the maximum length in bytes
    #[error("{field} is too long ({len} bytes, max {max})")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// Value contains a character that is not allowed
    #[error("{field} contains invalid character {found:?}")]
    InvalidCharacter { field: &'static str, found: char },

    /// Value is a reserved path component
    #[error("{field} must not be {value:?}")]
    Reserved { field: &'static str, value: String },

    /// Locator does not have the `<owner>/<filename>` shape
    #[error("Malformed locator: {0}")]
    MalformedLocator(String),
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
