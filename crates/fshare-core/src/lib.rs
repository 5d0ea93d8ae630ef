//! fshare core - shared domain types for the file-sharing service
//!
//! This crate provides the validated identifiers shared between the
//! daemon (fshared), the wire protocol, and the client.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod file;
pub mod name;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use file::{FileKey, Locator};
pub use name::{DisplayName, FileName, MAX_DISPLAY_NAME_LEN, MAX_FILE_NAME_LEN};
