//! Configuration module for arduino-relay.
//!
//! TOML configuration with environment variable overrides. It is read once
//! at startup; the relay never writes it back.
//!
//! # Configuration Resolution
//!
//! 1. `ARDUINO_RELAY_CONFIG` environment variable (explicit path)
//! 2. `./arduino-relay.toml` (current directory)
//! 3. The platform config directory, e.g. `~/.config/arduino-relay/arduino-relay.toml`
//! 4. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! Every key can be overridden with `ARDUINO_RELAY_<SECTION>_<KEY>`:
//! - `ARDUINO_RELAY_RELAY_MODE=serial`
//! - `ARDUINO_RELAY_SERVER_PORT=8080`
//! - `ARDUINO_RELAY_LOGGING_FORMAT=json`
//!
//! # Example
//!
//! ```rust,ignore
//! use arduino_relay::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! let settings = loader.config().relay_settings();
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{get_default_config_dir, resolve_config_path, ConfigLoader};
pub use schema::{Config, LogFormat, LoggingConfig, RelayConfig, ServerConfig};
