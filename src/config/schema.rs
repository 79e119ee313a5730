//! Configuration schema definitions.
//!
//! Every section is `#[serde(default)]`, so a file only needs the keys it
//! changes.

use crate::state::{
    ConnectionMode, RelayOptions, RelaySettings, ServerSettings, DEFAULT_REMOTE_URL,
    DEFAULT_SERVER_PORT,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device connection settings
    pub relay: RelayConfig,
    /// The relay's own WebSocket server
    pub server: ServerConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Settings to start a relay with. The mode is left at `None`; it is
    /// applied through `set_connection_mode` so the usual notifications fire.
    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            mode: ConnectionMode::None,
            serial_interface: self.relay.serial_interface.clone(),
            remote_url: self.relay.remote_url.clone(),
            server: ServerSettings {
                enabled: self.server.enabled,
                port: self.server.port,
            },
        }
    }

    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            report_websocket_close: self.relay.report_websocket_close,
            echo_to_clients: self.relay.echo_to_clients,
        }
    }
}

/// Device connection section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Mode name; anything unrecognised means "none"
    pub mode: String,
    /// Serial interface; empty picks the first Arduino found
    pub serial_interface: String,
    /// Device URL for websocket mode
    pub remote_url: String,
    /// Flip to disconnected immediately when a websocket link is closed locally
    pub report_websocket_close: bool,
    /// Forward device messages to every server client
    pub echo_to_clients: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            mode: ConnectionMode::None.as_str().to_string(),
            serial_interface: String::new(),
            remote_url: DEFAULT_REMOTE_URL.to_string(),
            report_websocket_close: false,
            echo_to_clients: false,
        }
    }
}

impl RelayConfig {
    pub fn connection_mode(&self) -> ConnectionMode {
        ConnectionMode::normalize(&self.mode)
    }
}

/// Relay server section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    /// TCP port; 0 binds an ephemeral port
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: DEFAULT_SERVER_PORT,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset: "trace" .. "error"
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format
    Json,
    /// Pretty format with colors
    #[default]
    Pretty,
    /// Compact format
    Compact,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.relay.mode, "none");
        assert_eq!(config.relay.remote_url, "ws://192.168.1.61:55777");
        assert!(!config.server.enabled);
        assert_eq!(config.server.port, 55777);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [relay]
            mode = "WebSocket"
            remote_url = "ws://10.0.0.2:81"

            [server]
            enabled = true
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.relay.connection_mode(), ConnectionMode::WebSocket);
        assert_eq!(config.relay.remote_url, "ws://10.0.0.2:81");
        assert!(config.server.enabled);
        // Defaults should still work
        assert_eq!(config.server.port, 55777);
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_unknown_mode_is_none() {
        let config: Config = toml::from_str("[relay]\nmode = \"bluetooth\"").unwrap();
        assert_eq!(config.relay.connection_mode(), ConnectionMode::None);
    }

    #[test]
    fn test_relay_settings_start_in_none() {
        let mut config = Config::default();
        config.relay.mode = "serial".to_string();
        config.relay.serial_interface = "COM4".to_string();
        config.relay.echo_to_clients = true;
        config.server.port = 0;

        let settings = config.relay_settings();
        assert_eq!(settings.mode, ConnectionMode::None);
        assert_eq!(settings.serial_interface, "COM4");
        assert_eq!(settings.server.port, 0);
        assert!(config.relay_options().echo_to_clients);
        assert!(!config.relay_options().report_websocket_close);
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("compact".parse::<LogFormat>(), Ok(LogFormat::Compact));
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
