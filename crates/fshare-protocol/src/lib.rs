//! fshare protocol - wire grammar and framed channel
//!
//! This crate provides the line grammar spoken between clients and the
//! daemon, and the framed channel both sides use to speak it:
//! - `command` - client commands (`UPLOAD`, `LIST`, `DOWNLOAD`, `DELETE`, `EXIT`)
//! - `reply` - server lines (`OK`, `RESPONSE:`, `NOTIFICATION:`, `DATA:`, `ERROR`)
//! - `channel` - line and exact-length binary transfer over a byte stream

pub mod channel;
pub mod command;
pub mod reply;

pub use channel::{
    ChannelConfig, ChannelError, CopyError, FrameReader, FrameWriter, FramedChannel,
    DATA_CHUNK_SIZE, MAX_LINE_LEN,
};
pub use command::{announced_upload_size, Command, CommandParseError, Verb};
pub use reply::{messages, parse_list_entry, ServerLine};
