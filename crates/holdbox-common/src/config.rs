//! Configuration for Holdbox

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV: &str = "HOLDBOX_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// SMTP capture listener configuration
    #[serde(default)]
    pub smtp: SmtpConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Outbound relay used to release captured messages.
    /// Releasing is disabled when this section is absent.
    pub relay: Option<RelayConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hostname
    #[serde(default = "default_hostname")]
    pub hostname: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
        }
    }
}

fn default_hostname() -> String {
    "localhost".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path; `:memory:` keeps everything in memory
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./holdbox.db")
}

fn default_max_connections() -> u32 {
    5
}

impl DatabaseConfig {
    /// Whether the database lives in memory only
    pub fn is_memory(&self) -> bool {
        self.path.as_os_str() == ":memory:"
    }
}

/// SMTP capture listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Bind host
    #[serde(default = "default_smtp_host")]
    pub host: String,

    /// Capture port
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    /// Maximum message size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Maximum recipients per message
    #[serde(default = "default_max_recipients")]
    pub max_recipients: usize,

    /// Maximum concurrent connections
    #[serde(default = "default_smtp_max_connections")]
    pub max_connections: usize,

    /// Idle timeout per command in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            max_message_size: default_max_message_size(),
            max_recipients: default_max_recipients(),
            max_connections: default_smtp_max_connections(),
            connection_timeout_secs: default_connection_timeout(),
        }
    }
}

fn default_smtp_host() -> String {
    "0.0.0.0".to_string()
}

fn default_smtp_port() -> u16 {
    1025
}

fn default_max_message_size() -> usize {
    25 * 1024 * 1024 // 25 MB
}

fn default_max_recipients() -> usize {
    100
}

fn default_smtp_max_connections() -> usize {
    100
}

fn default_connection_timeout() -> u64 {
    300
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Bind host
    #[serde(default = "default_api_host")]
    pub host: String,

    /// API port
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Accepted API key hashes (SHA-256 hex or Argon2 PHC strings).
    /// Authentication is disabled when empty.
    #[serde(default)]
    pub api_keys: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            api_keys: Vec::new(),
        }
    }
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8025
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

/// Connection security towards the relay host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayTls {
    /// Plain SMTP
    None,
    /// Upgrade with STARTTLS
    #[default]
    Starttls,
    /// Implicit TLS (SMTPS)
    Tls,
}

/// Outbound relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay host
    pub host: String,

    /// Relay port
    #[serde(default = "default_relay_port")]
    pub port: u16,

    /// Connection security
    #[serde(default)]
    pub tls: RelayTls,

    /// Relay username
    pub username: Option<String>,

    /// Relay password
    pub password: Option<String>,

    /// Regular expression every released recipient must match
    pub allowed_recipients: Option<String>,

    /// Address forced as envelope sender and `Return-Path`
    pub return_path: Option<String>,

    /// Deadline for loading and for handing a message to the relay, in seconds
    #[serde(default = "default_relay_timeout")]
    pub timeout_secs: u64,
}

fn default_relay_port() -> u16 {
    587
}

fn default_relay_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML document
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from `HOLDBOX_CONFIG` or the default locations.
    ///
    /// Falls back to defaults when no file exists; an explicitly named file
    /// that cannot be read is an error.
    pub fn load() -> crate::Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::from_file(Path::new(&path));
        }

        let paths = [
            PathBuf::from("./holdbox.toml"),
            PathBuf::from("./config.toml"),
            PathBuf::from("/etc/holdbox/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                tracing::debug!(path = %path.display(), "Loading configuration");
                return Self::from_file(&path);
            }
        }

        Ok(Self::default())
    }
}
