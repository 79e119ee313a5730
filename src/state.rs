//! Relay data model: connection mode, in-memory settings and snapshots.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Default listen port of the relay's own WebSocket server.
pub const DEFAULT_SERVER_PORT: u16 = 55777;

/// Default device address used in WebSocket mode.
pub const DEFAULT_REMOTE_URL: &str = "ws://192.168.1.61:55777";

/// Which transport variant is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    #[default]
    None,
    Serial,
    WebSocket,
}

impl ConnectionMode {
    /// Parse a mode name case-insensitively. Anything else, including
    /// padded names, becomes `None`.
    pub fn normalize(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "serial" => Self::Serial,
            "websocket" => Self::WebSocket,
            _ => Self::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Serial => "serial",
            Self::WebSocket => "websocket",
        }
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mode names selectable on this host; `serial` only when serial is supported.
pub fn connection_modes(serial_available: bool) -> Vec<String> {
    let mut modes = Vec::with_capacity(3);
    if serial_available {
        modes.push(ConnectionMode::Serial.as_str().to_string());
    }
    modes.push(ConnectionMode::WebSocket.as_str().to_string());
    modes.push(ConnectionMode::None.as_str().to_string());
    modes
}

/// Settings of the relay's own WebSocket server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            port: DEFAULT_SERVER_PORT,
        }
    }
}

/// The mutable, in-memory configuration of a relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaySettings {
    pub mode: ConnectionMode,
    /// Selected serial interface; empty means "pick the first Arduino found".
    pub serial_interface: String,
    pub remote_url: String,
    pub server: ServerSettings,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            mode: ConnectionMode::None,
            serial_interface: String::new(),
            remote_url: DEFAULT_REMOTE_URL.to_string(),
            server: ServerSettings::default(),
        }
    }
}

/// Behaviour switches that are not part of the observable settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RelayOptions {
    /// When false (the default), `disconnect()` flips the connection state
    /// synchronously only for serial; a WebSocket close is reported when the
    /// transport's own close notification is processed.
    pub report_websocket_close: bool,
    /// Forward every device message to all connected server clients.
    pub echo_to_clients: bool,
}

/// Point-in-time view of a relay, as served to the command surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelaySnapshot {
    pub connection_mode: ConnectionMode,
    pub connected: bool,
    pub serial_interface: String,
    pub remote_url: String,
    pub server_enabled: bool,
    pub server_port: u16,
    /// Address actually bound, when the server is listening.
    pub server_addr: Option<SocketAddr>,
    pub clients: usize,
    pub connection_modes: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_known_modes() {
        assert_eq!(ConnectionMode::normalize("none"), ConnectionMode::None);
        assert_eq!(ConnectionMode::normalize("Serial"), ConnectionMode::Serial);
        assert_eq!(ConnectionMode::normalize("WEBSOCKET"), ConnectionMode::WebSocket);
    }

    #[test]
    fn test_normalize_unknown_is_none() {
        assert_eq!(ConnectionMode::normalize("bluetooth"), ConnectionMode::None);
        assert_eq!(ConnectionMode::normalize(""), ConnectionMode::None);
        assert_eq!(ConnectionMode::normalize(" serial "), ConnectionMode::None);
        assert_eq!(ConnectionMode::normalize("websocket\n"), ConnectionMode::None);
    }

    #[test]
    fn test_connection_modes_list() {
        assert_eq!(connection_modes(true), vec!["serial", "websocket", "none"]);
        assert_eq!(connection_modes(false), vec!["websocket", "none"]);
    }

    #[test]
    fn test_default_settings() {
        let settings = RelaySettings::default();
        assert_eq!(settings.mode, ConnectionMode::None);
        assert!(settings.serial_interface.is_empty());
        assert_eq!(settings.remote_url, "ws://192.168.1.61:55777");
        assert!(!settings.server.enabled);
        assert_eq!(settings.server.port, 55777);
    }

    #[test]
    fn test_mode_serde_names() {
        let json = serde_json::to_string(&ConnectionMode::WebSocket).unwrap();
        assert_eq!(json, "\"websocket\"");
        let mode: ConnectionMode = serde_json::from_str("\"serial\"").unwrap();
        assert_eq!(mode, ConnectionMode::Serial);
    }

    proptest! {
        #[test]
        fn normalize_is_total_and_stable(name in ".*") {
            let mode = ConnectionMode::normalize(&name);
            // Normalizing the canonical name is a fixed point
            prop_assert_eq!(ConnectionMode::normalize(mode.as_str()), mode);
        }
    }
}
