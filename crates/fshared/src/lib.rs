//! fshare daemon - file registry, session directory and TCP server
//!
//! This crate provides the server side of fshare:
//! - `registry` - file registry actor with its durable log
//! - `directory` - live sessions by display name, notification routing
//! - `storage` - where uploaded bytes live
//! - `server` - TCP listener, per-connection sessions and the command dispatcher
//! - `events` - timestamped activity stream for a presentation layer
//! - `config` - server settings
//! - `cli` - the `fshared` command-line entry point
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      fshared daemon                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │   FileServer    │────▶│      RegistryActor          │   │
//! │  │  (TcpListener)  │     │  (file record owner + log)  │   │
//! │  └────────┬────────┘     └─────────────────────────────┘   │
//! │           │                                                 │
//! │           │ connections                                     │
//! │           ▼                                                 │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │    Session      │────▶│     SessionDirectory        │   │
//! │  │  (per client)   │     │  (name → writer, notify)    │   │
//! │  └────────┬────────┘     └─────────────────────────────┘   │
//! │           │                                                 │
//! │           ▼                                                 │
//! │  ┌─────────────────┐                                        │
//! │  │    FsStorage    │  files/<owner>/<filename>              │
//! │  └─────────────────┘                                        │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod cli;
pub mod config;
pub mod directory;
pub mod events;
pub mod registry;
pub mod server;
pub mod storage;

pub use config::{ConfigError, ServerConfig};
pub use events::{EventKind, ServerEvent};
pub use server::{FileServer, ServerError};
