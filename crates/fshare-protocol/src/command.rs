//! Client commands and their line grammar.
//!
//! Every command is a single whitespace-separated line. `UPLOAD` is
//! additionally followed by exactly `<size>` raw payload bytes.

use std::fmt;

use fshare_core::{DisplayName, DomainError, FileName};
use thiserror::Error;

/// Command verbs understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Upload,
    List,
    Download,
    Delete,
    Exit,
}

impl Verb {
    /// Returns the wire spelling of the verb.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Upload => "UPLOAD",
            Verb::List => "LIST",
            Verb::Download => "DOWNLOAD",
            Verb::Delete => "DELETE",
            Verb::Exit => "EXIT",
        }
    }

    /// Number of arguments following the verb.
    fn arity(&self) -> usize {
        match self {
            Verb::Upload | Verb::Download => 2,
            Verb::Delete => 1,
            Verb::List | Verb::Exit => 0,
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "UPLOAD" => Some(Verb::Upload),
            "LIST" => Some(Verb::List),
            "DOWNLOAD" => Some(Verb::Download),
            "DELETE" => Some(Verb::Delete),
            "EXIT" => Some(Verb::Exit),
            _ => None,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Store `size` bytes under (filename, caller)
    Upload { filename: FileName, size: u64 },
    /// Enumerate every registered file
    List,
    /// Fetch (filename, owner)
    Download { filename: FileName, owner: DisplayName },
    /// Remove (filename, caller)
    Delete { filename: FileName },
    /// End the session
    Exit,
}

impl Command {
    /// Parses a command line.
    ///
    /// The verb must be the whole first token; `UPLOADX` is unknown, not an
    /// upload.
    pub fn parse(line: &str) -> Result<Self, CommandParseError> {
        let mut tokens = line.split_whitespace();
        let verb_token = tokens.next().ok_or(CommandParseError::Empty)?;
        let verb = Verb::from_token(verb_token).ok_or_else(|| CommandParseError::Unknown {
            verb: verb_token.to_string(),
        })?;

        let args: Vec<&str> = tokens.collect();
        if args.len() != verb.arity() {
            return Err(CommandParseError::Arity { verb });
        }
        let mut args = args.into_iter();
        let mut next = || args.next().ok_or(CommandParseError::Arity { verb });

        let command = match verb {
            Verb::Upload => {
                let filename = parse_file_name(verb, next()?)?;
                let raw_size = next()?;
                let size = raw_size
                    .parse::<u64>()
                    .map_err(|_| CommandParseError::InvalidSize {
                        value: raw_size.to_string(),
                    })?;
                Command::Upload { filename, size }
            }
            Verb::List => Command::List,
            Verb::Download => {
                let filename = parse_file_name(verb, next()?)?;
                let owner = DisplayName::new(next()?)
                    .map_err(|source| CommandParseError::InvalidName { verb, source })?;
                Command::Download { filename, owner }
            }
            Verb::Delete => Command::Delete {
                filename: parse_file_name(verb, next()?)?,
            },
            Verb::Exit => Command::Exit,
        };

        Ok(command)
    }

    /// Returns the verb of this command.
    pub fn verb(&self) -> Verb {
        match self {
            Command::Upload { .. } => Verb::Upload,
            Command::List => Verb::List,
            Command::Download { .. } => Verb::Download,
            Command::Delete { .. } => Verb::Delete,
            Command::Exit => Verb::Exit,
        }
    }
}

/// Returns the payload size announced by an `UPLOAD` line, whether or not
/// the rest of the line is valid.
///
/// Used to skip the payload of a rejected upload.
pub fn announced_upload_size(line: &str) -> Option<u64> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens.as_slice() {
        ["UPLOAD", _, size] => size.parse().ok(),
        _ => None,
    }
}

fn parse_file_name(verb: Verb, raw: &str) -> Result<FileName, CommandParseError> {
    FileName::new(raw).map_err(|source| CommandParseError::InvalidName { verb, source })
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Upload { filename, size } => write!(f, "UPLOAD {filename} {size}"),
            Command::List => f.write_str("LIST"),
            Command::Download { filename, owner } => write!(f, "DOWNLOAD {filename} {owner}"),
            Command::Delete { filename } => write!(f, "DELETE {filename}"),
            Command::Exit => f.write_str("EXIT"),
        }
    }
}

/// Reasons a command line could not be parsed.
///
/// The `Display` text is what the server sends back after `ERROR `.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandParseError {
    #[error("Empty command.")]
    Empty,

    #[error("Unknown command.")]
    Unknown { verb: String },

    #[error("Invalid {verb} command.")]
    Arity { verb: Verb },

    #[error("Invalid {verb} command: {source}")]
    InvalidName { verb: Verb, source: DomainError },

    #[error("Invalid UPLOAD command: size {value:?} is not a byte count")]
    InvalidSize { value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str) -> FileName {
        FileName::new(name).unwrap()
    }

    #[test]
    fn test_parse_upload() {
        assert_eq!(
            Command::parse("UPLOAD report.pdf 1024").unwrap(),
            Command::Upload {
                filename: file("report.pdf"),
                size: 1024
            }
        );
    }

    #[test]
    fn test_parse_tolerates_extra_spacing() {
        assert_eq!(
            Command::parse("  DOWNLOAD  a.txt   bob ").unwrap(),
            Command::Download {
                filename: file("a.txt"),
                owner: DisplayName::new("bob").unwrap()
            }
        );
    }

    #[test]
    fn test_parse_simple_verbs() {
        assert_eq!(Command::parse("LIST").unwrap(), Command::List);
        assert_eq!(Command::parse("EXIT").unwrap(), Command::Exit);
        assert_eq!(
            Command::parse("DELETE x").unwrap(),
            Command::Delete { filename: file("x") }
        );
    }

    #[test]
    fn test_parse_wrong_arity() {
        let err = Command::parse("UPLOAD only-name").unwrap_err();
        assert_eq!(err, CommandParseError::Arity { verb: Verb::Upload });
        assert_eq!(err.to_string(), "Invalid UPLOAD command.");

        assert_eq!(
            Command::parse("DELETE a b").unwrap_err().to_string(),
            "Invalid DELETE command."
        );
        assert_eq!(
            Command::parse("LIST everything").unwrap_err(),
            CommandParseError::Arity { verb: Verb::List }
        );
    }

    #[test]
    fn test_parse_unknown_is_whole_token() {
        let err = Command::parse("UPLOADX a 1").unwrap_err();
        assert!(matches!(err, CommandParseError::Unknown { ref verb } if verb == "UPLOADX"));
        assert_eq!(err.to_string(), "Unknown command.");
        assert!(matches!(
            Command::parse("list").unwrap_err(),
            CommandParseError::Unknown { .. }
        ));
    }

    #[test]
    fn test_parse_invalid_size() {
        assert!(matches!(
            Command::parse("UPLOAD a.txt -5").unwrap_err(),
            CommandParseError::InvalidSize { .. }
        ));
        assert!(matches!(
            Command::parse("UPLOAD a.txt lots").unwrap_err(),
            CommandParseError::InvalidSize { .. }
        ));
    }

    #[test]
    fn test_parse_rejects_traversal_names() {
        assert!(matches!(
            Command::parse("DOWNLOAD ../../etc/passwd alice").unwrap_err(),
            CommandParseError::InvalidName { verb: Verb::Download, .. }
        ));
        assert!(matches!(
            Command::parse("DOWNLOAD a.txt ..").unwrap_err(),
            CommandParseError::InvalidName { .. }
        ));
    }

    #[test]
    fn test_announced_upload_size() {
        assert_eq!(announced_upload_size("UPLOAD ../x 12"), Some(12));
        assert_eq!(announced_upload_size("UPLOAD a.txt lots"), None);
        assert_eq!(announced_upload_size("UPLOAD a.txt"), None);
        assert_eq!(announced_upload_size("DELETE a.txt 12"), None);
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(Command::parse("   ").unwrap_err(), CommandParseError::Empty);
    }

    #[test]
    fn test_display_matches_grammar() {
        for line in ["UPLOAD a.bin 3", "LIST", "DOWNLOAD a.bin carol", "DELETE a.bin", "EXIT"] {
            assert_eq!(Command::parse(line).unwrap().to_string(), line);
        }
    }
}
