//! Server-to-client lines.
//!
//! Every line the server writes is one of:
//! - `OK` (handshake accepted)
//! - `RESPONSE:<payload>` (command result, possibly several per command)
//! - `NOTIFICATION:<text>` (asynchronous, outside the request/response cycle)
//! - `DATA:<n>` followed by exactly `n` raw bytes (`DATA:0` ends a download)
//! - `ERROR <message>`

use std::fmt;

use fshare_core::{DisplayName, FileName};

pub const OK: &str = "OK";
pub const RESPONSE_PREFIX: &str = "RESPONSE:";
pub const NOTIFICATION_PREFIX: &str = "NOTIFICATION:";
pub const DATA_PREFIX: &str = "DATA:";
pub const ERROR_PREFIX: &str = "ERROR";

/// Error message texts shared by server and client.
pub mod messages {
    pub const NAME_IN_USE: &str = "Username already in use.";
    pub const FILE_NOT_FOUND: &str = "File not found.";
    pub const FILE_MISSING_ON_SERVER: &str = "File not found on server.";
    pub const NOT_OWNED_OR_MISSING: &str = "You do not own this file or it does not exist.";
    pub const UNKNOWN_COMMAND: &str = "Unknown command.";
}

/// One line written by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerLine {
    Ok,
    Response(String),
    Notification(String),
    Data(usize),
    Error(String),
    /// Anything that does not match the grammar (client side only)
    Other(String),
}

impl ServerLine {
    /// Parses a received line (terminator already stripped).
    pub fn parse(line: &str) -> Self {
        if line == OK {
            return ServerLine::Ok;
        }
        if let Some(payload) = line.strip_prefix(RESPONSE_PREFIX) {
            return ServerLine::Response(payload.to_string());
        }
        if let Some(text) = line.strip_prefix(NOTIFICATION_PREFIX) {
            let text = text.strip_prefix(' ').unwrap_or(text);
            return ServerLine::Notification(text.to_string());
        }
        if let Some(len) = line.strip_prefix(DATA_PREFIX) {
            return match len.trim().parse::<usize>() {
                Ok(n) => ServerLine::Data(n),
                Err(_) => ServerLine::Other(line.to_string()),
            };
        }
        if let Some(rest) = line.strip_prefix(ERROR_PREFIX) {
            if rest.is_empty() || rest.starts_with(' ') {
                return ServerLine::Error(rest.trim_start().to_string());
            }
        }
        ServerLine::Other(line.to_string())
    }

    /// Notification sent to an owner when someone downloads their file.
    pub fn download_notice(filename: &FileName, downloader: &DisplayName) -> Self {
        ServerLine::Notification(format!(
            "Your file '{filename}' was downloaded by {downloader}."
        ))
    }

    /// Reply to a completed upload.
    pub fn uploaded(filename: &FileName) -> Self {
        ServerLine::Response(format!("{filename} uploaded successfully."))
    }

    /// Reply to a completed delete.
    pub fn deleted(filename: &FileName) -> Self {
        ServerLine::Response(format!("{filename} deleted successfully."))
    }

    /// Creates an error line.
    pub fn error(message: impl Into<String>) -> Self {
        ServerLine::Error(message.into())
    }
}

impl fmt::Display for ServerLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerLine::Ok => f.write_str(OK),
            ServerLine::Response(payload) => write!(f, "{RESPONSE_PREFIX}{payload}"),
            ServerLine::Notification(text) => write!(f, "{NOTIFICATION_PREFIX} {text}"),
            ServerLine::Data(n) => write!(f, "{DATA_PREFIX}{n}"),
            ServerLine::Error(message) => write!(f, "{ERROR_PREFIX} {message}"),
            ServerLine::Other(raw) => f.write_str(raw),
        }
    }
}

/// Parses a LIST entry of the form `<filename> (Owner: <owner>)`.
pub fn parse_list_entry(payload: &str) -> Option<(FileName, DisplayName)> {
    let (filename, rest) = payload.split_once(" (Owner: ")?;
    let owner = rest.strip_suffix(')')?;
    Some((FileName::new(filename).ok()?, DisplayName::new(owner).ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_lines() {
        assert_eq!(ServerLine::Ok.to_string(), "OK");
        assert_eq!(ServerLine::Response("3".into()).to_string(), "RESPONSE:3");
        assert_eq!(ServerLine::Data(4096).to_string(), "DATA:4096");
        assert_eq!(
            ServerLine::error(messages::FILE_NOT_FOUND).to_string(),
            "ERROR File not found."
        );
    }

    #[test]
    fn test_download_notice_text() {
        let line = ServerLine::download_notice(
            &FileName::new("song.mp3").unwrap(),
            &DisplayName::new("bob").unwrap(),
        );
        assert_eq!(
            line.to_string(),
            "NOTIFICATION: Your file 'song.mp3' was downloaded by bob."
        );
    }

    #[test]
    fn test_parse_known_lines() {
        assert_eq!(ServerLine::parse("OK"), ServerLine::Ok);
        assert_eq!(
            ServerLine::parse("RESPONSE:a.txt (Owner: bob)"),
            ServerLine::Response("a.txt (Owner: bob)".into())
        );
        assert_eq!(ServerLine::parse("DATA:0"), ServerLine::Data(0));
        assert_eq!(
            ServerLine::parse("NOTIFICATION: hello"),
            ServerLine::Notification("hello".into())
        );
        assert_eq!(
            ServerLine::parse("ERROR Username already in use."),
            ServerLine::Error(messages::NAME_IN_USE.into())
        );
    }

    #[test]
    fn test_parse_unexpected_lines() {
        assert!(matches!(ServerLine::parse("DATA:abc"), ServerLine::Other(_)));
        assert!(matches!(ServerLine::parse("ERRORS"), ServerLine::Other(_)));
        assert!(matches!(ServerLine::parse("hello"), ServerLine::Other(_)));
    }

    #[test]
    fn test_parse_list_entry() {
        let (file, owner) = parse_list_entry("notes.md (Owner: carol)").unwrap();
        assert_eq!(file.as_str(), "notes.md");
        assert_eq!(owner.as_str(), "carol");
        assert!(parse_list_entry("notes.md").is_none());
    }
}
