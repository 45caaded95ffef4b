//! Configuration module for the delayed echo server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "delayed-echo")]
#[command(author = "delayed-echo authors")]
#[command(version = "0.1.0")]
#[command(about = "A TCP echo server that answers after a fixed delay", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0)
    #[arg(short = 'H', long)]
    pub host: Option<IpAddr>,

    /// TCP port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Per-connection buffer size in bytes; bounds the message size
    #[arg(short, long)]
    pub buffer_size: Option<usize>,

    /// Maximum number of live connections (also sizes the ring)
    #[arg(short, long)]
    pub max_connections: Option<usize>,

    /// Delay before each answer, in seconds
    #[arg(short, long)]
    pub delay: Option<u64>,

    /// Listen backlog
    #[arg(long)]
    pub backlog: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub connection: ConnectionSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Listening socket configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backlog: default_backlog(),
        }
    }
}

/// Per-connection configuration
#[derive(Debug, Deserialize)]
pub struct ConnectionSection {
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            max_connections: default_max_connections(),
            delay_secs: default_delay_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Largest connection limit the ring can back: io_uring caps a ring at
/// 32768 entries and one of them is reserved for the accept.
pub const MAX_CONNECTIONS_LIMIT: usize = 32767;

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    7050
}

fn default_backlog() -> u32 {
    16
}

fn default_buffer_size() -> usize {
    1024
}

fn default_max_connections() -> usize {
    4096
}

fn default_delay_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Listening socket parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketConfig {
    pub host: IpAddr,
    pub port: u16,
    pub backlog: u32,
}

/// Event loop parameters, fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    /// Capacity of each connection's input and output buffer.
    pub buffer_size: usize,
    /// Admission limit for live connections.
    pub max_connections: usize,
    /// Artificial delay between a read and its answer.
    pub delay: Duration,
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub socket: SocketConfig,
    pub server: ServerConfig,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Resolve parsed CLI args, reading the TOML file they point at (if any).
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args over TOML values and validate the result.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let config = Config {
            socket: SocketConfig {
                host: cli.host.unwrap_or(toml_config.server.host),
                port: cli.port.unwrap_or(toml_config.server.port),
                backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            },
            server: ServerConfig {
                buffer_size: cli
                    .buffer_size
                    .unwrap_or(toml_config.connection.buffer_size),
                max_connections: cli
                    .max_connections
                    .unwrap_or(toml_config.connection.max_connections),
                delay: Duration::from_secs(
                    cli.delay.unwrap_or(toml_config.connection.delay_secs),
                ),
            },
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be non-zero".into()));
        }
        if u32::try_from(self.server.buffer_size).is_err() {
            return Err(ConfigError::Invalid(format!(
                "buffer_size {} exceeds the maximum I/O length",
                self.server.buffer_size
            )));
        }
        if self.server.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be non-zero".into(),
            ));
        }
        if self.server.max_connections > MAX_CONNECTIONS_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "max_connections {} exceeds the limit of {}",
                self.server.max_connections, MAX_CONNECTIONS_LIMIT
            )));
        }
        if self.socket.backlog == 0 {
            return Err(ConfigError::Invalid("backlog must be non-zero".into()));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
