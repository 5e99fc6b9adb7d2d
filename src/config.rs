//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use crate::client::session::SessionConfig;
use crate::error::{DsuError, Result};
use crate::protocol::protocol::{
    DSU_CLIENT_PORT_DEFAULT, DSU_MAX_SERVERS, DSU_SERVER_ADDRESS_DEFAULT, DSU_SERVER_PORT_DEFAULT,
};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub dsu: DsuConfig,

    #[serde(default)]
    pub session: SessionTimingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// DSU server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DsuConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Comma-separated `address[:port]` list
    #[serde(default = "default_servers")]
    pub servers: String,

    /// Base local port; 0 for ephemeral ports
    #[serde(default = "default_client_port")]
    pub client_port: u16,
}

/// Session timing configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SessionTimingConfig {
    #[serde(default = "default_resubscribe_interval_ms")]
    pub resubscribe_interval_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_receive_wait_ms")]
    pub receive_wait_ms: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily log files; empty logs to stdout only
    #[serde(default)]
    pub directory: String,

    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
}

// Default value functions
fn default_enabled() -> bool { true }
fn default_servers() -> String { format!("{}:{}", DSU_SERVER_ADDRESS_DEFAULT, DSU_SERVER_PORT_DEFAULT) }
fn default_client_port() -> u16 { DSU_CLIENT_PORT_DEFAULT }

fn default_resubscribe_interval_ms() -> u64 { 500 }
fn default_timeout_ms() -> u64 { 5000 }
fn default_receive_wait_ms() -> u64 { 10 }

fn default_log_level() -> String { "info".to_string() }
fn default_log_file_prefix() -> String { "dsu-client.log".to_string() }

impl Default for DsuConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            servers: default_servers(),
            client_port: default_client_port(),
        }
    }
}

impl Default for SessionTimingConfig {
    fn default() -> Self {
        Self {
            resubscribe_interval_ms: default_resubscribe_interval_ms(),
            timeout_ms: default_timeout_ms(),
            receive_wait_ms: default_receive_wait_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            file_prefix: default_log_file_prefix(),
        }
    }
}

fn invalid(message: impl fmt::Display) -> DsuError {
    DsuError::Config(toml::de::Error::custom(message))
}

/// One configured server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    pub host: String,
    pub port: u16,
}

impl ServerEndpoint {
    /// Resolve to a socket address, preferring IPv4
    ///
    /// # Errors
    ///
    /// Returns `DsuError::Address` if the host does not resolve
    pub fn resolve(&self) -> Result<SocketAddr> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| DsuError::Address(format!("{}: {}", self, e)))?
            .collect();

        addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| DsuError::Address(format!("{}: no addresses", self)))
    }
}

impl fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Parse one `address[:port]` entry
fn parse_server(entry: &str) -> Result<ServerEndpoint> {
    let (host, port) = if let Some(rest) = entry.strip_prefix('[') {
        // [v6]:port or [v6]
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| invalid(format!("unterminated IPv6 address in '{}'", entry)))?;
        match tail.strip_prefix(':') {
            Some(port) => (host, Some(port)),
            None if tail.is_empty() => (host, None),
            None => return Err(invalid(format!("unexpected '{}' after address in '{}'", tail, entry))),
        }
    } else if entry.matches(':').count() == 1 {
        let (host, port) = entry.split_once(':').unwrap_or((entry, ""));
        (host, Some(port))
    } else {
        // Bare host, or a bare IPv6 address without a port
        (entry, None)
    };

    if host.is_empty() {
        return Err(invalid(format!("empty server address in '{}'", entry)));
    }

    let port = match port {
        Some(port) => port
            .trim()
            .parse::<u16>()
            .ok()
            .filter(|&p| p != 0)
            .ok_or_else(|| invalid(format!("server port must be between 1 and 65535 in '{}'", entry)))?,
        None => DSU_SERVER_PORT_DEFAULT,
    };

    Ok(ServerEndpoint {
        host: host.trim().to_string(),
        port,
    })
}

/// Parse a comma-separated `address[:port]` server list
///
/// Empty entries are skipped; the port defaults to 26760.
///
/// # Errors
///
/// Returns error if the list is empty, holds more than four servers, or an
/// entry is malformed
///
/// # Examples
///
/// ```
/// use dsu_client::config::parse_server_list;
///
/// let servers = parse_server_list("127.0.0.1, 192.168.1.20:26770")?;
/// assert_eq!(servers[0].port, 26760);
/// assert_eq!(servers[1].port, 26770);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn parse_server_list(list: &str) -> Result<Vec<ServerEndpoint>> {
    let servers = list
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(parse_server)
        .collect::<Result<Vec<_>>>()?;

    if servers.is_empty() {
        return Err(invalid("at least one DSU server must be configured"));
    }
    if servers.len() > DSU_MAX_SERVERS {
        return Err(invalid(format!(
            "at most {} DSU servers may be configured, got {}",
            DSU_MAX_SERVERS,
            servers.len()
        )));
    }

    Ok(servers)
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use dsu_client::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        parse_server_list(&self.dsu.servers)?;

        if self.session.resubscribe_interval_ms == 0 || self.session.resubscribe_interval_ms > 60000 {
            return Err(invalid("resubscribe_interval_ms must be between 1 and 60000"));
        }

        if self.session.timeout_ms < 100 || self.session.timeout_ms > 60000 {
            return Err(invalid("timeout_ms must be between 100 and 60000"));
        }

        if self.session.receive_wait_ms == 0 || self.session.receive_wait_ms > 1000 {
            return Err(invalid("receive_wait_ms must be between 1 and 1000"));
        }

        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(invalid("logging level must be one of: trace, debug, info, warn, error"));
        }

        if !self.logging.directory.is_empty() && self.logging.file_prefix.is_empty() {
            return Err(invalid("logging file_prefix cannot be empty when a directory is set"));
        }

        Ok(())
    }

    /// Resolve servers and timings into session parameters
    ///
    /// # Errors
    ///
    /// Returns error if the server list is invalid or a server does not
    /// resolve
    pub fn session_config(&self) -> Result<SessionConfig> {
        let servers = parse_server_list(&self.dsu.servers)?
            .iter()
            .map(ServerEndpoint::resolve)
            .collect::<Result<Vec<_>>>()?;

        Ok(SessionConfig {
            servers,
            client_port: self.dsu.client_port,
            resubscribe_interval: Duration::from_millis(self.session.resubscribe_interval_ms),
            timeout: Duration::from_millis(self.session.timeout_ms),
            recv_wait: Duration::from_millis(self.session.receive_wait_ms),
        })
    }
}
