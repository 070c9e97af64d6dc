//! Configuration for the qnet binary.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::frame::{FrameCodec, SIZE_DIGITS, SIZE_RANGE};
use crate::handler::{DEFAULT_MOTD, DEFAULT_WHO};
use crate::server::{ServerOptions, DEFAULT_QUEUE_SIZE};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "qnet")]
#[command(version)]
#[command(about = "QNet demo server and one-shot client", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to serve on, or to connect to with --send
    #[arg(long)]
    pub host: Option<String>,

    /// Port to serve on, or to connect to with --send
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Listen backlog
    #[arg(short, long)]
    pub queue_size: Option<u32>,

    /// Trim whitespace around incoming requests
    #[arg(long)]
    pub auto_strip: bool,

    /// Response to `who`
    #[arg(long)]
    pub name: Option<String>,

    /// Response to `motd`
    #[arg(long)]
    pub motd: Option<String>,

    /// Send one message to a server, print the response and exit
    #[arg(short, long)]
    pub send: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_queue_size")]
    pub queue_size: u32,
    #[serde(default)]
    pub auto_strip: bool,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_motd")]
    pub motd: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            queue_size: default_queue_size(),
            auto_strip: false,
            name: default_name(),
            motd: default_motd(),
        }
    }
}

/// Framing limits; both ends of a conversation must agree on these
#[derive(Debug, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default = "default_size_digits")]
    pub size_digits: usize,
    #[serde(default = "default_size_range")]
    pub size_range: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            size_digits: default_size_digits(),
            size_range: default_size_range(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    4099
}

fn default_queue_size() -> u32 {
    DEFAULT_QUEUE_SIZE
}

fn default_name() -> String {
    DEFAULT_WHO.to_string()
}

fn default_motd() -> String {
    DEFAULT_MOTD.to_string()
}

fn default_size_digits() -> usize {
    SIZE_DIGITS
}

fn default_size_range() -> usize {
    SIZE_RANGE
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub queue_size: u32,
    pub auto_strip: bool,
    pub name: String,
    pub motd: String,
    /// Framing limits from `[protocol]`, already checked
    pub codec: FrameCodec,
    /// Client mode: message to send instead of serving
    pub send: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point at, if any.
    /// CLI arguments take precedence over TOML file values.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            queue_size: cli.queue_size.unwrap_or(toml_config.server.queue_size),
            auto_strip: cli.auto_strip || toml_config.server.auto_strip,
            name: cli.name.unwrap_or(toml_config.server.name),
            motd: cli.motd.unwrap_or(toml_config.server.motd),
            codec: protocol_codec(&toml_config.protocol)?,
            send: cli.send,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be between 1 and 65535".into()));
        }
        if self.queue_size == 0 || i32::try_from(self.queue_size).is_err() {
            return Err(ConfigError::Invalid(format!(
                "queue_size must be between 1 and {}",
                i32::MAX
            )));
        }
        Ok(())
    }

    pub fn server_options(&self) -> ServerOptions {
        ServerOptions::new(self.host.clone(), self.port)
            .auto_strip(self.auto_strip)
            .queue_size(self.queue_size)
            .codec(self.codec)
    }
}

/// Build the codec described by `[protocol]`.
fn protocol_codec(protocol: &ProtocolConfig) -> Result<FrameCodec, ConfigError> {
    FrameCodec::new(protocol.size_digits, protocol.size_range)
        .map_err(|e| ConfigError::Invalid(e.to_string()))
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
