//! Configuration management for the WebSSH bridge.
//!
//! This module provides TOML-based configuration file loading.
//! The default configuration path is `~/.config/webssh/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use protocol::TerminalGeometry;
use serde::Deserialize;
use thiserror::Error;

/// Default listen host.
pub const DEFAULT_HOST: &str = "localhost";

/// Default listen port.
pub const DEFAULT_PORT: u16 = 17542;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("port must be greater than 0")]
    InvalidPort,

    #[error("host must not be empty")]
    InvalidHost,

    #[error("upgrade path must start with '/', got {0:?}")]
    InvalidPath(String),

    #[error("{name} must be greater than 0")]
    ZeroValue { name: &'static str },

    #[error("pty geometry must be non-zero, got {rows}x{cols}")]
    InvalidGeometry { rows: u32, cols: u32 },

    #[error("log level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the bridge.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Listener settings.
    pub server: ServerConfig,

    /// WebSocket upgrade settings.
    pub upgrade: UpgradeConfig,

    /// Outbound SSH settings.
    pub ssh: SshConfig,

    /// Relay tuning.
    pub relay: RelayConfig,

    /// Logging settings.
    pub log: LogConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to listen on.
    pub host: String,

    /// Port to listen on.
    pub port: u16,

    /// Request path that accepts the WebSocket upgrade.
    pub path: String,

    /// Seconds to wait for open sessions during shutdown.
    pub shutdown_timeout_secs: u64,
}

/// WebSocket upgrade configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpgradeConfig {
    /// Outgoing frame buffer size in bytes.
    pub write_buffer_size: usize,

    /// Largest accepted inbound message in bytes.
    pub max_message_size: usize,

    /// Allowed `Origin` header values. Empty allows every origin.
    pub allowed_origins: Vec<String>,
}

/// SSH client configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SshConfig {
    /// Port used when the client does not send one.
    pub default_port: u16,

    /// Seconds allowed for TCP connect plus SSH handshake.
    pub connect_timeout_secs: u64,

    /// TERM value requested for the pty.
    pub term: String,

    /// Initial pty rows.
    pub rows: u32,

    /// Initial pty columns.
    pub cols: u32,
}

/// Relay tuning.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    /// Shell output read buffer in bytes.
    pub read_buffer_size: usize,

    /// Per-message send deadline in seconds.
    pub write_timeout_secs: u64,

    /// Pause after a failed shell read, in milliseconds.
    pub idle_pause_ms: u64,

    /// Seconds a relay gets to exit after its transports are closed.
    pub teardown_grace_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub level: String,

    /// Optional log file; logs go to stderr when unset.
    pub file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            path: "/ws".to_string(),
            shutdown_timeout_secs: 10,
        }
    }
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            write_buffer_size: 512,
            max_message_size: 64 * 1024,
            allowed_origins: Vec::new(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        let geometry = TerminalGeometry::default();
        Self {
            default_port: 22,
            connect_timeout_secs: 15,
            term: "xterm".to_string(),
            rows: geometry.rows,
            cols: geometry.cols,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 512,
            write_timeout_secs: 10,
            idle_pause_ms: 10,
            teardown_grace_secs: 2,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl ServerConfig {
    /// Returns `host:port`, bracketing IPv6 literals.
    pub fn listen_addr(&self) -> String {
        join_host_port(&self.host, self.port)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl SshConfig {
    pub fn geometry(&self) -> TerminalGeometry {
        TerminalGeometry::new(self.rows, self.cols)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Joins a host and port the way `net.JoinHostPort` does.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("webssh")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - WEBSSH_HOST: Override listen host
    /// - WEBSSH_PORT: Override listen port
    /// - WEBSSH_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("WEBSSH_HOST") {
            if !host.is_empty() {
                tracing::info!("Overriding server.host from environment: {}", host);
                self.server.host = host;
            }
        }

        if let Ok(port) = std::env::var("WEBSSH_PORT") {
            match port.parse::<u16>() {
                Ok(port) => {
                    tracing::info!("Overriding server.port from environment: {}", port);
                    self.server.port = port;
                }
                Err(e) if !port.is_empty() => {
                    tracing::warn!(value = %port, error = %e, "Ignoring invalid WEBSSH_PORT");
                }
                Err(_) => {}
            }
        }

        if let Ok(level) = std::env::var("WEBSSH_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log.level from environment: {}", level);
                self.log.level = level;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::InvalidHost);
        }

        if self.server.port == 0 || self.ssh.default_port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        if !self.server.path.starts_with('/') {
            return Err(ConfigError::InvalidPath(self.server.path.clone()));
        }

        let non_zero = [
            ("upgrade.write_buffer_size", self.upgrade.write_buffer_size as u64),
            ("upgrade.max_message_size", self.upgrade.max_message_size as u64),
            ("relay.read_buffer_size", self.relay.read_buffer_size as u64),
            ("relay.write_timeout_secs", self.relay.write_timeout_secs),
            ("relay.idle_pause_ms", self.relay.idle_pause_ms),
            ("relay.teardown_grace_secs", self.relay.teardown_grace_secs),
            ("ssh.connect_timeout_secs", self.ssh.connect_timeout_secs),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::ZeroValue { name });
            }
        }

        if self.ssh.rows == 0 || self.ssh.cols == 0 {
            return Err(ConfigError::InvalidGeometry {
                rows: self.ssh.rows,
                cols: self.ssh.cols,
            });
        }

        let level = self.log.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.log.level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.server.port, 17542);
        assert_eq!(config.server.path, "/ws");
        assert_eq!(config.server.shutdown_timeout_secs, 10);
        assert_eq!(config.upgrade.write_buffer_size, 512);
        assert!(config.upgrade.allowed_origins.is_empty());
        assert_eq!(config.ssh.default_port, 22);
        assert_eq!(config.ssh.term, "xterm");
        assert_eq!(config.ssh.geometry(), TerminalGeometry::new(60, 40));
        assert_eq!(config.relay.read_buffer_size, 512);
        assert_eq!(config.relay.write_timeout_secs, 10);
        assert_eq!(config.log.level, "info");
        assert!(config.log.file.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[server]
port = 8080

[ssh]
rows = 24
cols = 80
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.ssh.geometry(), TerminalGeometry::new(24, 80));
        assert_eq!(config.relay, RelayConfig::default());
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[server]
host = "0.0.0.0"
port = 9000
path = "/terminal"
shutdown_timeout_secs = 5

[upgrade]
write_buffer_size = 4096
max_message_size = 1024
allowed_origins = ["https://console.example.com"]

[ssh]
default_port = 2222
connect_timeout_secs = 3
term = "xterm-256color"
rows = 50
cols = 200

[relay]
read_buffer_size = 1024
write_timeout_secs = 4
idle_pause_ms = 25
teardown_grace_secs = 1

[log]
level = "debug"
file = "/var/log/webssh/bridge.log"
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.server.listen_addr(), "0.0.0.0:9000");
        assert_eq!(config.server.path, "/terminal");
        assert_eq!(config.server.shutdown_timeout(), Duration::from_secs(5));
        assert_eq!(config.upgrade.write_buffer_size, 4096);
        assert_eq!(
            config.upgrade.allowed_origins,
            vec!["https://console.example.com"]
        );
        assert_eq!(config.ssh.default_port, 2222);
        assert_eq!(config.ssh.connect_timeout(), Duration::from_secs(3));
        assert_eq!(config.ssh.term, "xterm-256color");
        assert_eq!(config.relay.idle_pause_ms, 25);
        assert_eq!(config.log.level, "debug");
        assert_eq!(
            config.log.file,
            Some(PathBuf::from("/var/log/webssh/bridge.log"))
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let result = Config::from_toml("[server\nport = 1");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let result = Config::from_toml("[server]\nport = \"not a number\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        fs::write(
            &config_path,
            "[ssh]\ndefault_port = 2200\n\n[log]\nlevel = \"warn\"\nfile = \"/tmp/bridge.log\"\n",
        )
        .unwrap();
        let loaded = Config::load(&config_path).unwrap();

        assert_eq!(loaded.ssh.default_port, 2200);
        assert_eq!(loaded.log.level, "warn");
        assert_eq!(loaded.log.file, Some(PathBuf::from("/tmp/bridge.log")));
        assert_eq!(loaded.server, Config::default().server);
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        fs::write(&config_path, "invalid [ toml").unwrap();

        let result = Config::load(&config_path);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Failed to parse config file"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.to_string_lossy().contains("webssh"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn test_join_host_port() {
        assert_eq!(join_host_port("localhost", 17542), "localhost:17542");
        assert_eq!(join_host_port("10.0.0.5", 22), "10.0.0.5:22");
        assert_eq!(join_host_port("::1", 22), "[::1]:22");
        assert_eq!(join_host_port("[::1]", 22), "[::1]:22");
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let mut config = Config::default();
        config.server.port = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidPort));
    }

    #[test]
    fn test_validate_rejects_relative_path() {
        let mut config = Config::default();
        config.server.path = "ws".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidPath("ws".to_string()))
        );
    }

    #[test]
    fn test_validate_rejects_zero_buffer() {
        let mut config = Config::default();
        config.relay.read_buffer_size = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroValue {
                name: "relay.read_buffer_size"
            })
        );
    }

    #[test]
    fn test_validate_rejects_zero_write_timeout() {
        let mut config = Config::default();
        config.relay.write_timeout_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroValue { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_idle_pause() {
        let mut config = Config::default();
        config.relay.idle_pause_ms = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroValue {
                name: "relay.idle_pause_ms"
            })
        );
    }

    #[test]
    fn test_validate_rejects_zero_teardown_grace() {
        let mut config = Config::default();
        config.relay.teardown_grace_secs = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroValue {
                name: "relay.teardown_grace_secs"
            })
        );
    }

    #[test]
    fn test_validate_rejects_zero_geometry() {
        let mut config = Config::default();
        config.ssh.cols = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidGeometry { rows: 60, cols: 0 })
        );
    }

    #[test]
    fn test_validate_rejects_unknown_log_level() {
        let mut config = Config::default();
        config.log.level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }

    #[test]
    fn test_validate_accepts_uppercase_log_level() {
        let mut config = Config::default();
        config.log.level = "DEBUG".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_env_override_port_and_host() {
        std::env::set_var("WEBSSH_HOST", "0.0.0.0");
        std::env::set_var("WEBSSH_PORT", "9999");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9999);

        std::env::remove_var("WEBSSH_HOST");
        std::env::remove_var("WEBSSH_PORT");
    }

    #[test]
    #[serial]
    fn test_env_override_invalid_port_ignored() {
        std::env::set_var("WEBSSH_PORT", "seventy");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.server.port, DEFAULT_PORT);

        std::env::remove_var("WEBSSH_PORT");
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        std::env::set_var("WEBSSH_LOG_LEVEL", "");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.log.level, "info");

        std::env::remove_var("WEBSSH_LOG_LEVEL");
    }

    #[test]
    #[serial]
    fn test_env_override_log_level() {
        std::env::set_var("WEBSSH_LOG_LEVEL", "trace");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.log.level, "trace");

        std::env::remove_var("WEBSSH_LOG_LEVEL");
    }
}
