//! Arduino Relay Library
//!
//! Keeps a single command channel to an Arduino board open over USB serial
//! or WebSocket, publishes what the board reports, and optionally runs a
//! WebSocket server whose clients' messages are forwarded to the board.
//!
//! # Modules
//!
//! - `config`: Configuration management with TOML support
//! - `error`: Errors of the handle/service boundary
//! - `events`: Outward notifications and the core's inbox
//! - `port`: Serial capability (enumeration, adapters, mocks)
//! - `relay`: Connection-mode state machine and message routing
//! - `server`: The relay's WebSocket server and its client set
//! - `service`: Runs the relay in one task behind a cloneable handle
//! - `state`: Connection modes, settings and snapshots
//! - `stdio`: Console front end used by the binary
//! - `transport`: Serial, WebSocket and null transports

pub mod config;
pub mod error;
pub mod events;
pub mod port;
pub mod relay;
pub mod server;
pub mod service;
pub mod state;
pub mod stdio;
pub mod transport;

// Re-export commonly used types for convenience
pub use error::{RelayError, RelayResult};
pub use events::RelayEvent;
pub use port::{MockSerialBackend, MockSerialPort, PortConfiguration, PortError, SerialBackend};
pub use relay::RelayCore;
pub use service::{RelayHandle, RelayService};
pub use state::{ConnectionMode, RelayOptions, RelaySettings, RelaySnapshot};
pub use transport::{DefaultTransportFactory, Transport, TransportFactory};

// Re-export config types
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
