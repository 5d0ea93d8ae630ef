//! `fshare` command-line entry point.
//!
//! # Usage
//!
//! ```bash
//! fshare --name alice upload ./notes.md
//! fshare --name bob list --json
//! fshare --name bob download notes.md alice -o ~/Downloads
//! fshare --name alice delete notes.md
//! fshare --server files.lan:5050 --name alice watch
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fshare_core::{DisplayName, FileName};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::client::Client;

/// fshare - share files with everyone connected to a server
#[derive(Parser, Debug)]
#[command(name = "fshare", version, about)]
pub struct Args {
    /// Server address
    #[arg(long, short = 's', global = true, default_value = "127.0.0.1:5050")]
    server: String,

    /// Display name to connect as
    #[arg(long, short = 'n')]
    name: DisplayName,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every shared file
    List {
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },
    /// Upload a local file under its own name
    Upload { path: PathBuf },
    /// Download another user's file
    Download {
        filename: FileName,
        owner: DisplayName,
        /// Directory to save into
        #[arg(long, short = 'o', default_value = ".")]
        output: PathBuf,
    },
    /// Delete one of your files
    Delete { filename: FileName },
    /// Stay connected and print download notifications
    Watch,
}

/// Parses the command line and runs the requested command.
pub fn run() -> Result<()> {
    let args = Args::parse();
    init_logging();
    run_command(args)
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn run_command(args: Args) -> Result<()> {
    let name = args.name;
    let mut client = Client::connect(args.server.as_str(), &name)
        .await
        .with_context(|| format!("Failed to connect to {} as {name}", args.server))?;

    match args.command {
        Command::List { json } => {
            let keys = client.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&keys)?);
            } else if keys.is_empty() {
                println!("No files shared.");
            } else {
                for key in &keys {
                    println!("{key}");
                }
            }
        }
        Command::Upload { path } => {
            let reply = client
                .upload_file(&path)
                .await
                .with_context(|| format!("Failed to upload {}", path.display()))?;
            println!("{reply}");
        }
        Command::Download {
            filename,
            owner,
            output,
        } => {
            let path = client
                .download_to(&filename, &owner, &output)
                .await
                .with_context(|| format!("Failed to download {filename} from {owner}"))?;
            println!("Saved {}", path.display());
        }
        Command::Delete { filename } => {
            println!("{}", client.delete(&filename).await?);
        }
        Command::Watch => {
            watch(&mut client).await?;
        }
    }

    while let Ok(text) = client.notifications().try_recv() {
        eprintln!("{text}");
    }

    if let Err(e) = client.exit().await {
        debug!(error = %e, "EXIT failed");
    }
    Ok(())
}

/// Prints notifications until Ctrl+C or the server goes away.
async fn watch(client: &mut Client) -> Result<()> {
    eprintln!("Watching as {} (Ctrl+C to stop)", client.name());
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                return Ok(());
            }
            note = client.notifications().recv() => {
                match note {
                    Some(text) => println!("{text}"),
                    None => bail!("Server closed the connection"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_download_arguments() {
        let args = Args::try_parse_from([
            "fshare", "--name", "bob", "download", "song.mp3", "alice", "-o", "/tmp",
        ])
        .unwrap();
        match args.command {
            Command::Download {
                filename,
                owner,
                output,
            } => {
                assert_eq!(filename.as_str(), "song.mp3");
                assert_eq!(owner.as_str(), "alice");
                assert_eq!(output, PathBuf::from("/tmp"));
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(args.server, "127.0.0.1:5050");
    }

    #[test]
    fn test_invalid_filename_rejected_at_parse() {
        assert!(Args::try_parse_from(["fshare", "--name", "bob", "delete", "../x"]).is_err());
    }

    #[test]
    fn test_server_flag_after_subcommand() {
        let args = Args::try_parse_from([
            "fshare", "--name", "carol", "list", "--json", "--server", "files.lan:5050",
        ])
        .unwrap();
        assert!(matches!(args.command, Command::List { json: true }));
        assert_eq!(args.name.as_str(), "carol");
        assert_eq!(args.server, "files.lan:5050");
    }

    #[test]
    fn test_missing_name_is_usage_error() {
        let err = Args::try_parse_from(["fshare", "list"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }
}
