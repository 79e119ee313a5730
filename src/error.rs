//! Crate-level error type.
//!
//! Transport, serial and server failures are not represented here: the relay
//! reports those through state and events. What remains is startup
//! configuration and the front end losing its connection to the service.

use thiserror::Error;

/// A specialized `Result` type for relay handle operations.
pub type RelayResult<T> = Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    /// The relay service task has stopped; no further commands are accepted.
    #[error("relay service is not running")]
    ServiceStopped,

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}
