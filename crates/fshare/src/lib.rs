//! fshare client - protocol client and command-line interface
//!
//! - `client` - a connected session with request/reply operations and a
//!   notification stream
//! - `cli` - the `fshare` command-line entry point
//!
//! # Example
//!
//! ```rust,ignore
//! use fshare_client::Client;
//!
//! let mut client = Client::connect("127.0.0.1:5050", &"bob".parse()?).await?;
//! let bytes = client.download(&"song.mp3".parse()?, &"alice".parse()?).await?;
//! ```

pub mod cli;
pub mod client;
pub mod error;

pub use client::Client;
pub use error::{ClientError, Result};
