//! Daemon configuration.
//!
//! Resolution order: built-in defaults, then a TOML file, then environment
//! variables. Command-line flags are applied last by the CLI.
//!
//! ```toml
//! bind = "0.0.0.0"
//! port = 5050
//! data_dir = "/var/lib/fshare"
//! idle_timeout_secs = 300
//! write_timeout_secs = 10
//! max_upload_bytes = 4294967296
//! ```

use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fshare_protocol::{ChannelConfig, MAX_LINE_LEN};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 5050;

/// Name of the registry log inside the data directory.
pub const REGISTRY_LOG_NAME: &str = "file_owner_map.txt";

pub const ENV_PORT: &str = "FSHARE_PORT";
pub const ENV_DATA_DIR: &str = "FSHARE_DATA_DIR";

/// Errors raised while resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to listen on
    pub bind: IpAddr,
    /// Port to listen on (0 picks a free port)
    pub port: u16,
    /// Root of the registry log and stored files
    pub data_dir: PathBuf,
    /// Longest wait for a client line or payload chunk (0 = forever)
    pub idle_timeout_secs: u64,
    /// Longest wait for one outbound write (0 = forever)
    pub write_timeout_secs: u64,
    /// Largest accepted upload
    pub max_upload_bytes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            data_dir: default_data_dir(),
            idle_timeout_secs: 300,
            write_timeout_secs: 10,
            max_upload_bytes: 4 * 1024 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Default config file location: `<config_dir>/fshare/server.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("fshare").join("server.toml"))
    }

    /// Loads configuration.
    ///
    /// An explicit `path` must exist. Without one the default location is
    /// used if present. Environment overrides are applied afterwards.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env_from(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Reads a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Parses TOML; missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Applies `FSHARE_PORT` and `FSHARE_DATA_DIR` as returned by `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_PORT) {
            self.port = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_PORT,
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup(ENV_DATA_DIR) {
            if value.is_empty() {
                return Err(ConfigError::InvalidEnv {
                    var: ENV_DATA_DIR,
                    value,
                });
            }
            self.data_dir = PathBuf::from(value);
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn registry_log_path(&self) -> PathBuf {
        self.data_dir.join(REGISTRY_LOG_NAME)
    }

    pub fn files_dir(&self) -> PathBuf {
        self.data_dir.join("files")
    }

    pub fn incoming_dir(&self) -> PathBuf {
        self.data_dir.join("incoming")
    }

    /// Deadlines and limits for session channels.
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            read_timeout: secs(self.idle_timeout_secs),
            write_timeout: secs(self.write_timeout_secs),
            max_line_len: MAX_LINE_LEN,
        }
    }
}

fn secs(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("fshare"))
        .unwrap_or_else(|| PathBuf::from("fshare-data"))
}
